pub mod shape_inference;
