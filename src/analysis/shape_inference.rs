//! Module for shape and data type inference (Shape Inference).
//!
//! Determines the shape and data type of the output tensor for each node
//! based on its input shapes and operation type. Unlike a whole-graph pass,
//! inference here runs eagerly: the graph owner calls [`infer_node_shape`]
//! for every operation node right after inserting it, so a malformed graph
//! fails at construction time, and the declared shape of any expression can
//! be queried while the network is still being built. Lazy parameter
//! creation depends on exactly that query.

use crate::asg::{Asg, AsgError, AsgId, DType, NodeId, NodeType, Shape};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeInferenceError {
    #[error("Graph error: {0}")]
    AsgError(#[from] AsgError),

    #[error("Incompatible shapes for operation '{op}': left operand {shape1:?}, right operand {shape2:?}. \
             Ensure dimensions are compatible for broadcasting or matrix multiplication.")]
    IncompatibleShapes {
        op: String,
        shape1: Shape,
        shape2: Shape,
    },

    #[error("Shape information missing for node {0}. \
             Data nodes must be declared with a shape before they are used in operations.")]
    MissingShapeInfo(NodeId),

    #[error("Invalid tensor rank for node {node_id}: expected {expected}D, got {actual}D. \
             Check input data dimensions.")]
    InvalidRank {
        node_id: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("Axis {axis} is out of range for node {node_id} of rank {rank}.")]
    InvalidAxis {
        node_id: NodeId,
        axis: usize,
        rank: usize,
    },

    #[error("Index {index} is out of range for axis {axis} of length {len} (node {node_id}).")]
    IndexOutOfRange {
        node_id: NodeId,
        axis: usize,
        index: isize,
        len: usize,
    },

    #[error("Broadcast error: cannot broadcast shapes {0:?} and {1:?} to a common shape.")]
    BroadcastError(Shape, Shape),

    #[error("Matrix multiplication error: incompatible inner dimensions {0} and {1}.")]
    MatmulDimensionError(usize, usize),

    #[error("Cannot reshape {count} elements into {requested:?} (node {node_id}).")]
    InvalidReshape {
        node_id: NodeId,
        count: usize,
        requested: Vec<i64>,
    },

    #[error("Shape inference not implemented for operation: {0}.")]
    UnimplementedNodeType(String),
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

/// Computes the NumPy-style common broadcast shape of two operand shapes.
///
/// Shapes are aligned on their trailing dimensions; a dimension of 1
/// stretches to match the other operand.
pub fn broadcast_shapes(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![0usize; rank];
    for i in 0..rank {
        let l = if i < rank - lhs.len() { 1 } else { lhs[i - (rank - lhs.len())] };
        let r = if i < rank - rhs.len() { 1 } else { rhs[i - (rank - rhs.len())] };
        out[i] = if l == r {
            l
        } else if l == 1 {
            r
        } else if r == 1 {
            l
        } else {
            return Err(ShapeInferenceError::BroadcastError(lhs.clone(), rhs.clone()));
        };
    }
    Ok(out)
}

/// Infers the shape and dtype of a single freshly inserted operation node.
///
/// Operand shapes are read from already-inferred nodes of the same graph;
/// `ScanOutput` additionally reads the output shapes of the scan body graph,
/// which is always fully built before the `Scan` node referencing it.
pub fn infer_node_shape(graphs: &[Asg], asg_id: AsgId, node_id: NodeId) -> Result<(Shape, DType)> {
    let asg = graphs.get(asg_id).ok_or(AsgError::AsgNotFound(asg_id))?;
    let node = asg.get_node(node_id)?;

    let dims = |id: NodeId| -> Result<(Shape, DType)> {
        let n = asg.get_node(id)?;
        match (&n.shape, &n.dtype) {
            (Some(s), Some(d)) => Ok((s.clone(), *d)),
            _ => Err(ShapeInferenceError::MissingShapeInfo(id)),
        }
    };

    match &node.node_type {
        // Data nodes are declared with shapes by the graph owner; reaching
        // one here means it was used before being declared.
        NodeType::Input { .. }
        | NodeType::Parameter { .. }
        | NodeType::Literal(_)
        | NodeType::NormalNoise { .. } => Err(ShapeInferenceError::MissingShapeInfo(node_id)),

        NodeType::CategoricalSample { pvals, .. } => {
            let (shape, _) = dims(*pvals)?;
            Ok((shape, DType::I32))
        }

        NodeType::Add(l, r)
        | NodeType::Subtract(l, r)
        | NodeType::Multiply(l, r)
        | NodeType::Divide(l, r) => {
            let (ls, ld) = dims(*l)?;
            let (rs, _) = dims(*r)?;
            Ok((broadcast_shapes(&ls, &rs)?, ld))
        }

        NodeType::Power(base, _) => dims(*base),

        NodeType::MatrixMultiply(l, r) => {
            let (ls, ld) = dims(*l)?;
            let (rs, _) = dims(*r)?;
            if ls.len() < 2 {
                return Err(ShapeInferenceError::InvalidRank {
                    node_id,
                    expected: 2,
                    actual: ls.len(),
                });
            }
            if rs.len() != 2 {
                return Err(ShapeInferenceError::InvalidRank {
                    node_id,
                    expected: 2,
                    actual: rs.len(),
                });
            }
            let k1 = ls[ls.len() - 1];
            if k1 != rs[0] {
                return Err(ShapeInferenceError::MatmulDimensionError(k1, rs[0]));
            }
            let mut out = ls[..ls.len() - 1].to_vec();
            out.push(rs[1]);
            Ok((out, ld))
        }

        NodeType::Negate(id)
        | NodeType::Exp(id)
        | NodeType::Log(id)
        | NodeType::Tanh(id)
        | NodeType::Sigmoid(id)
        | NodeType::ReLU(id)
        | NodeType::Softplus(id) => dims(*id),

        NodeType::Mean(id) => {
            let (_, dtype) = dims(*id)?;
            Ok((vec![], dtype))
        }

        NodeType::SumAxis { input, axis }
        | NodeType::MaxAxis { input, axis }
        | NodeType::MeanAxis { input, axis } => {
            let (mut shape, dtype) = dims(*input)?;
            if *axis >= shape.len() {
                return Err(ShapeInferenceError::InvalidAxis {
                    node_id,
                    axis: *axis,
                    rank: shape.len(),
                });
            }
            shape[*axis] = 1;
            Ok((shape, dtype))
        }

        NodeType::Reshape { input, shape: requested } => {
            let (in_shape, dtype) = dims(*input)?;
            let count: usize = in_shape.iter().product();
            let known: i64 = requested.iter().filter(|&&d| d != -1).product();
            let holes = requested.iter().filter(|&&d| d == -1).count();
            let invalid = || ShapeInferenceError::InvalidReshape {
                node_id,
                count,
                requested: requested.clone(),
            };
            if holes > 1 || known <= 0 {
                return Err(invalid());
            }
            let mut out = Vec::with_capacity(requested.len());
            for &d in requested {
                if d == -1 {
                    if count % known as usize != 0 {
                        return Err(invalid());
                    }
                    out.push(count / known as usize);
                } else {
                    out.push(d as usize);
                }
            }
            if out.iter().product::<usize>() != count {
                return Err(invalid());
            }
            Ok((out, dtype))
        }

        NodeType::Transpose(id, axis1, axis2) => {
            let (mut shape, dtype) = dims(*id)?;
            if *axis1 >= shape.len() || *axis2 >= shape.len() {
                return Err(ShapeInferenceError::InvalidAxis {
                    node_id,
                    axis: (*axis1).max(*axis2),
                    rank: shape.len(),
                });
            }
            shape.swap(*axis1, *axis2);
            Ok((shape, dtype))
        }

        NodeType::ExpandDims(id, axis) => {
            let (mut shape, dtype) = dims(*id)?;
            if *axis > shape.len() {
                return Err(ShapeInferenceError::InvalidAxis {
                    node_id,
                    axis: *axis,
                    rank: shape.len(),
                });
            }
            shape.insert(*axis, 1);
            Ok((shape, dtype))
        }

        NodeType::Concat { inputs, axis } => {
            let (first, dtype) = dims(inputs[0])?;
            if *axis >= first.len() {
                return Err(ShapeInferenceError::InvalidAxis {
                    node_id,
                    axis: *axis,
                    rank: first.len(),
                });
            }
            let mut out = first.clone();
            for id in &inputs[1..] {
                let (shape, _) = dims(*id)?;
                let compatible = shape.len() == first.len()
                    && shape
                        .iter()
                        .zip(first.iter())
                        .enumerate()
                        .all(|(i, (a, b))| i == *axis || a == b);
                if !compatible {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "Concat".to_string(),
                        shape1: first.clone(),
                        shape2: shape,
                    });
                }
                out[*axis] += shape[*axis];
            }
            Ok((out, dtype))
        }

        NodeType::SliceAxis { input, axis, start, len } => {
            let (mut shape, dtype) = dims(*input)?;
            if *axis >= shape.len() {
                return Err(ShapeInferenceError::InvalidAxis {
                    node_id,
                    axis: *axis,
                    rank: shape.len(),
                });
            }
            if start + len > shape[*axis] {
                return Err(ShapeInferenceError::IndexOutOfRange {
                    node_id,
                    axis: *axis,
                    index: (start + len) as isize,
                    len: shape[*axis],
                });
            }
            shape[*axis] = *len;
            Ok((shape, dtype))
        }

        NodeType::IndexAxis { input, axis, index } => {
            let (mut shape, dtype) = dims(*input)?;
            if *axis >= shape.len() {
                return Err(ShapeInferenceError::InvalidAxis {
                    node_id,
                    axis: *axis,
                    rank: shape.len(),
                });
            }
            let len = shape[*axis] as isize;
            let resolved = if *index < 0 { len + index } else { *index };
            if resolved < 0 || resolved >= len {
                return Err(ShapeInferenceError::IndexOutOfRange {
                    node_id,
                    axis: *axis,
                    index: *index,
                    len: len as usize,
                });
            }
            shape.remove(*axis);
            Ok((shape, dtype))
        }

        NodeType::Reverse { input, axis } => {
            let (shape, dtype) = dims(*input)?;
            if *axis >= shape.len() {
                return Err(ShapeInferenceError::InvalidAxis {
                    node_id,
                    axis: *axis,
                    rank: shape.len(),
                });
            }
            Ok((shape, dtype))
        }

        NodeType::TimeShift(id) => {
            let (shape, dtype) = dims(*id)?;
            if shape.is_empty() {
                return Err(ShapeInferenceError::InvalidRank {
                    node_id,
                    expected: 1,
                    actual: 0,
                });
            }
            Ok((shape, dtype))
        }

        NodeType::ZerosLike(id) | NodeType::OnesLike(id) => {
            let (shape, _) = dims(*id)?;
            Ok((shape, DType::F32))
        }

        NodeType::Gather { table, indices } => {
            let (table_shape, dtype) = dims(*table)?;
            let (index_shape, _) = dims(*indices)?;
            if table_shape.len() != 2 {
                return Err(ShapeInferenceError::InvalidRank {
                    node_id,
                    expected: 2,
                    actual: table_shape.len(),
                });
            }
            let mut out = index_shape;
            out.push(table_shape[1]);
            Ok((out, dtype))
        }

        NodeType::Dropout { input, .. } => {
            let (shape, dtype) = dims(*input)?;
            if shape.len() != 2 && shape.len() != 3 {
                return Err(ShapeInferenceError::InvalidRank {
                    node_id,
                    expected: 2,
                    actual: shape.len(),
                });
            }
            Ok((shape, dtype))
        }

        NodeType::Scan { body, sequences, initial_states, .. } => {
            // Форма самого узла Scan — форма его первого выхода;
            // остальные выходы достаются через ScanOutput.
            let (seq_shape, _) = dims(sequences[0])?;
            if seq_shape.is_empty() {
                return Err(ShapeInferenceError::InvalidRank {
                    node_id,
                    expected: 1,
                    actual: 0,
                });
            }
            let body_asg = graphs.get(*body).ok_or(AsgError::AsgNotFound(*body))?;
            if body_asg.outputs.len() != initial_states.len() {
                return Err(ShapeInferenceError::UnimplementedNodeType(format!(
                    "Scan body with {} outputs for {} states",
                    body_asg.outputs.len(),
                    initial_states.len()
                )));
            }
            let out0 = body_asg.get_node(body_asg.outputs[0])?;
            let state_shape = out0
                .shape
                .clone()
                .ok_or(ShapeInferenceError::MissingShapeInfo(body_asg.outputs[0]))?;
            let mut out = vec![seq_shape[0]];
            out.extend(state_shape);
            Ok((out, DType::F32))
        }

        NodeType::ScanOutput { scan, index } => {
            let scan_node = asg.get_node(*scan)?;
            let (body, sequences) = match &scan_node.node_type {
                NodeType::Scan { body, sequences, .. } => (*body, sequences.clone()),
                other => {
                    return Err(ShapeInferenceError::UnimplementedNodeType(format!(
                        "ScanOutput over {:?}",
                        other
                    )))
                }
            };
            let (seq_shape, _) = dims(sequences[0])?;
            let body_asg = graphs.get(body).ok_or(AsgError::AsgNotFound(body))?;
            let out_id = *body_asg
                .outputs
                .get(*index)
                .ok_or(AsgError::NodeNotFound(*index))?;
            let state_shape = body_asg
                .get_node(out_id)?
                .shape
                .clone()
                .ok_or(ShapeInferenceError::MissingShapeInfo(out_id))?;
            let mut out = vec![seq_shape[0]];
            out.extend(state_shape);
            Ok((out, DType::F32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_aligns_trailing_dimensions() {
        assert_eq!(broadcast_shapes(&vec![2, 1], &vec![2, 6]).unwrap(), vec![2, 6]);
        assert_eq!(broadcast_shapes(&vec![4, 2, 6], &vec![2, 6]).unwrap(), vec![4, 2, 6]);
        assert_eq!(broadcast_shapes(&vec![3], &vec![5, 3]).unwrap(), vec![5, 3]);
    }

    #[test]
    fn broadcast_rejects_mismatched_dimensions() {
        assert!(broadcast_shapes(&vec![2, 3], &vec![2, 4]).is_err());
    }
}
