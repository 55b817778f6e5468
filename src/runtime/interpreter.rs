//! Модуль, реализующий эталонный интерпретатор для ASG.
//!
//! Интерпретатор выполняет вычисления последовательно на CPU: обходит граф
//! вычислений (ASG) и для каждого узла выполняет соответствующую операцию
//! с помощью `ndarray`. Значения параметров берутся из реестра контекста,
//! датасеты подаются вызывающей стороной по именам, шумовые узлы
//! порождаются детерминированно из своих seed-ов.
//!
//! Узел Scan выполняется настоящим последовательным циклом: на каждом шаге
//! тело вычисляется в собственном под-контексте, входы тела связываются
//! позиционно (срезы последовательностей, протянутые состояния,
//! неизменяемые аргументы), выходы складываются в стек по оси времени.

use crate::analysis::shape_inference::broadcast_shapes;
use crate::asg::{Asg, AsgId, NodeId, NodeType, Value};
use crate::tensor::GraphContext;
use ndarray::{arr0, Array2, ArrayD, Axis, Ix2, IxDyn, Slice, Zip};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use thiserror::Error;

/// Ошибки, которые могут возникнуть во время выполнения (интерпретации) графа.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Узел с ID {0} (в графе {1}) не найден")]
    NodeNotFound(NodeId, AsgId),
    #[error("Граф с ID {0} не найден в контексте выполнения")]
    GraphNotFound(AsgId),
    #[error("Неверный тип значения для операции: ожидался {expected}, получен {actual}")]
    TypeError { expected: String, actual: String },
    #[error("Несовместимые формы тензоров для операции: {0}")]
    ShapeError(String),
    #[error("Для выполнения графа не предоставлено значение для входа '{0}' (ID: {1})")]
    MissingInput(String, NodeId),
    #[error("Для выполнения графа не предоставлено значение для параметра '{0}' (ID: {1})")]
    MissingParameter(String, NodeId),
    #[error("Операция {0} еще не реализована в интерпретаторе")]
    UnimplementedOperation(String),
}

/// Значение в кэше: обычный тензор или пачка выходов узла Scan.
#[derive(Debug, Clone)]
enum Slot {
    One(Value),
    Many(Vec<Value>),
}

/// Контекст выполнения для набора связанных графов.
struct ExecutionContext<'a> {
    /// Все графы вычисления; индекс в срезе совпадает с AsgId.
    graphs: &'a [Asg],
    /// Хранилище для входных данных и значений параметров.
    inputs: &'a HashMap<String, Value>,
    /// Кэш для уже вычисленных значений узлов. Ключ - это (AsgId, NodeId).
    memo: HashMap<(AsgId, NodeId), Slot>,
}

impl<'a> ExecutionContext<'a> {
    fn new(graphs: &'a [Asg], inputs: &'a HashMap<String, Value>) -> Self {
        Self { graphs, inputs, memo: HashMap::new() }
    }

    /// Главная функция, которая рекурсивно вычисляет значение для заданного узла.
    fn evaluate_node(&mut self, asg_id: AsgId, node_id: NodeId) -> Result<Value, RuntimeError> {
        if let Some(slot) = self.memo.get(&(asg_id, node_id)) {
            return Ok(match slot {
                Slot::One(value) => value.clone(),
                Slot::Many(values) => values[0].clone(),
            });
        }

        let asg = self
            .graphs
            .get(asg_id)
            .ok_or(RuntimeError::GraphNotFound(asg_id))?;
        let node = asg
            .nodes
            .get(&node_id)
            .ok_or(RuntimeError::NodeNotFound(node_id, asg_id))?;

        let result = match &node.node_type {
            NodeType::Input { name } => self
                .inputs
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::MissingInput(name.clone(), node_id)),

            NodeType::Parameter { name } => self
                .inputs
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::MissingParameter(name.clone(), node_id)),

            NodeType::Literal(value) => Ok(value.clone()),

            NodeType::NormalNoise { seed, .. } => {
                let shape = node
                    .shape
                    .clone()
                    .ok_or_else(|| RuntimeError::ShapeError("noise node without shape".into()))?;
                let mut rng = StdRng::seed_from_u64(*seed as u64);
                let noise: ArrayD<f32> =
                    ArrayD::random_using(IxDyn(&shape), StandardNormal, &mut rng);
                Ok(Value::Tensor(noise))
            }

            NodeType::CategoricalSample { pvals, seed, .. } => {
                let pvals = self.tensor_operand(asg_id, *pvals)?;
                op_categorical_sample(pvals, *seed)
            }

            NodeType::Add(l, r) => self.binary(asg_id, *l, *r, |a, b| a + b),
            NodeType::Subtract(l, r) => self.binary(asg_id, *l, *r, |a, b| a - b),
            NodeType::Multiply(l, r) => self.binary(asg_id, *l, *r, |a, b| a * b),
            NodeType::Divide(l, r) => self.binary(asg_id, *l, *r, |a, b| a / b),

            NodeType::MatrixMultiply(l, r) => {
                let lhs = self.tensor_operand(asg_id, *l)?;
                let rhs = self.tensor_operand(asg_id, *r)?;
                op_matmul(lhs, rhs)
            }

            NodeType::Power(base, power) => {
                let base = self.tensor_operand(asg_id, *base)?;
                let power = self.tensor_operand(asg_id, *power)?;
                op_power(base, power)
            }

            NodeType::Negate(id) => self.unary(asg_id, *id, |v| -v),
            NodeType::Exp(id) => self.unary(asg_id, *id, f32::exp),
            NodeType::Log(id) => self.unary(asg_id, *id, f32::ln),
            NodeType::Tanh(id) => self.unary(asg_id, *id, f32::tanh),
            NodeType::Sigmoid(id) => self.unary(asg_id, *id, |v| 1.0 / (1.0 + (-v).exp())),
            NodeType::ReLU(id) => self.unary(asg_id, *id, |v| v.max(0.0)),
            NodeType::Softplus(id) => self.unary(asg_id, *id, |v| {
                // при больших аргументах log(1 + e^x) численно равен x
                if v > 20.0 {
                    v
                } else {
                    (1.0 + v.exp()).ln()
                }
            }),

            NodeType::SumAxis { input, axis } => {
                let a = self.tensor_operand(asg_id, *input)?;
                check_axis(&a, *axis)?;
                Ok(Value::Tensor(a.sum_axis(Axis(*axis)).insert_axis(Axis(*axis))))
            }

            NodeType::MaxAxis { input, axis } => {
                let a = self.tensor_operand(asg_id, *input)?;
                check_axis(&a, *axis)?;
                let reduced = a.map_axis(Axis(*axis), |lane| {
                    lane.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v))
                });
                Ok(Value::Tensor(reduced.insert_axis(Axis(*axis))))
            }

            NodeType::MeanAxis { input, axis } => {
                let a = self.tensor_operand(asg_id, *input)?;
                check_axis(&a, *axis)?;
                let reduced = a
                    .mean_axis(Axis(*axis))
                    .ok_or_else(|| RuntimeError::ShapeError("mean over empty axis".into()))?;
                Ok(Value::Tensor(reduced.insert_axis(Axis(*axis))))
            }

            NodeType::Mean(id) => {
                let a = self.tensor_operand(asg_id, *id)?;
                let mean = a
                    .mean()
                    .ok_or_else(|| RuntimeError::ShapeError("mean of empty tensor".into()))?;
                Ok(Value::Tensor(arr0(mean).into_dyn()))
            }

            NodeType::Reshape { input, shape } => {
                let a = self.tensor_operand(asg_id, *input)?;
                op_reshape(a, shape)
            }

            NodeType::Transpose(id, axis1, axis2) => {
                let a = self.tensor_operand(asg_id, *id)?;
                op_transpose(a, *axis1, *axis2)
            }

            NodeType::ExpandDims(id, axis) => {
                let a = self.tensor_operand(asg_id, *id)?;
                if *axis > a.ndim() {
                    return Err(RuntimeError::ShapeError(format!(
                        "expand_dims axis {} for rank {}",
                        axis,
                        a.ndim()
                    )));
                }
                Ok(Value::Tensor(a.insert_axis(Axis(*axis))))
            }

            NodeType::Concat { inputs, axis } => {
                let mut parts = Vec::with_capacity(inputs.len());
                for id in inputs {
                    parts.push(self.tensor_operand(asg_id, *id)?);
                }
                let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
                ndarray::concatenate(Axis(*axis), &views)
                    .map(Value::Tensor)
                    .map_err(|e| RuntimeError::ShapeError(format!("concat: {}", e)))
            }

            NodeType::SliceAxis { input, axis, start, len } => {
                let a = self.tensor_operand(asg_id, *input)?;
                check_axis(&a, *axis)?;
                let sliced = a
                    .slice_axis(Axis(*axis), Slice::from(*start..*start + *len))
                    .to_owned();
                Ok(Value::Tensor(sliced))
            }

            NodeType::IndexAxis { input, axis, index } => {
                let a = self.tensor_operand(asg_id, *input)?;
                check_axis(&a, *axis)?;
                let len = a.shape()[*axis] as isize;
                let resolved = if *index < 0 { len + index } else { *index };
                if resolved < 0 || resolved >= len {
                    return Err(RuntimeError::ShapeError(format!(
                        "index {} out of range for axis {} of length {}",
                        index, axis, len
                    )));
                }
                Ok(Value::Tensor(a.index_axis(Axis(*axis), resolved as usize).to_owned()))
            }

            NodeType::Reverse { input, axis } => {
                let a = self.tensor_operand(asg_id, *input)?;
                check_axis(&a, *axis)?;
                let reversed = a.slice_axis(Axis(*axis), Slice::new(0, None, -1)).to_owned();
                Ok(Value::Tensor(reversed))
            }

            NodeType::TimeShift(id) => {
                let a = self.tensor_operand(asg_id, *id)?;
                op_time_shift(a)
            }

            NodeType::ZerosLike(id) => {
                let a = self.tensor_operand(asg_id, *id)?;
                Ok(Value::Tensor(ArrayD::zeros(a.raw_dim())))
            }

            NodeType::OnesLike(id) => {
                let a = self.tensor_operand(asg_id, *id)?;
                Ok(Value::Tensor(ArrayD::from_elem(a.raw_dim(), 1.0)))
            }

            NodeType::Gather { table, indices } => {
                let table = self.tensor_operand(asg_id, *table)?;
                let indices = self.tensor_operand(asg_id, *indices)?;
                op_gather(table, indices)
            }

            NodeType::Dropout { input, switch, prob, seed } => {
                let a = self.tensor_operand(asg_id, *input)?;
                let switch = self.tensor_operand(asg_id, *switch)?;
                op_dropout(a, switch, *prob, *seed)
            }

            NodeType::Scan { .. } => {
                let outputs = self.evaluate_scan(asg_id, node_id)?;
                let first = outputs[0].clone();
                self.memo.insert((asg_id, node_id), Slot::Many(outputs));
                return Ok(first);
            }

            NodeType::ScanOutput { scan, index } => {
                // Прогреваем кэш выходов Scan, затем достаём нужный.
                self.evaluate_node(asg_id, *scan)?;
                let slot = self
                    .memo
                    .get(&(asg_id, *scan))
                    .ok_or(RuntimeError::NodeNotFound(*scan, asg_id))?;
                match slot {
                    Slot::Many(values) => values
                        .get(*index)
                        .cloned()
                        .ok_or_else(|| RuntimeError::ShapeError(format!(
                            "scan output index {} out of range",
                            index
                        ))),
                    Slot::One(_) => Err(RuntimeError::TypeError {
                        expected: "scan outputs".to_string(),
                        actual: "tensor".to_string(),
                    }),
                }
            }
        }?;

        self.memo.insert((asg_id, node_id), Slot::One(result.clone()));
        Ok(result)
    }

    /// Вычисляет операнд и приводит его к тензору.
    fn tensor_operand(&mut self, asg_id: AsgId, node_id: NodeId) -> Result<ArrayD<f32>, RuntimeError> {
        as_tensor(self.evaluate_node(asg_id, node_id)?)
    }

    fn unary(
        &mut self,
        asg_id: AsgId,
        id: NodeId,
        f: impl Fn(f32) -> f32,
    ) -> Result<Value, RuntimeError> {
        let a = self.tensor_operand(asg_id, id)?;
        Ok(Value::Tensor(a.mapv(f)))
    }

    fn binary(
        &mut self,
        asg_id: AsgId,
        l: NodeId,
        r: NodeId,
        f: impl Fn(f32, f32) -> f32,
    ) -> Result<Value, RuntimeError> {
        let lhs = self.tensor_operand(asg_id, l)?;
        let rhs = self.tensor_operand(asg_id, r)?;
        op_broadcast_binary(&lhs, &rhs, f).map(Value::Tensor)
    }

    /// Последовательное выполнение узла Scan.
    fn evaluate_scan(&mut self, asg_id: AsgId, node_id: NodeId) -> Result<Vec<Value>, RuntimeError> {
        let asg = self
            .graphs
            .get(asg_id)
            .ok_or(RuntimeError::GraphNotFound(asg_id))?;
        let node = asg
            .nodes
            .get(&node_id)
            .ok_or(RuntimeError::NodeNotFound(node_id, asg_id))?;
        let (body, sequences, initial_states, non_sequences) = match &node.node_type {
            NodeType::Scan { body, sequences, initial_states, non_sequences } => {
                (*body, sequences.clone(), initial_states.clone(), non_sequences.clone())
            }
            other => {
                return Err(RuntimeError::UnimplementedOperation(format!("{:?}", other)));
            }
        };

        let mut sequence_values = Vec::with_capacity(sequences.len());
        for id in &sequences {
            sequence_values.push(self.tensor_operand(asg_id, *id)?);
        }
        let steps = sequence_values
            .first()
            .map(|s| s.shape()[0])
            .ok_or_else(|| RuntimeError::ShapeError("scan without sequences".into()))?;
        for seq in &sequence_values {
            if seq.shape()[0] != steps {
                return Err(RuntimeError::ShapeError(
                    "scan sequences disagree on the number of timesteps".into(),
                ));
            }
        }

        let mut states = Vec::with_capacity(initial_states.len());
        for id in &initial_states {
            states.push(self.tensor_operand(asg_id, *id)?);
        }
        let mut non_sequence_values = Vec::with_capacity(non_sequences.len());
        for id in &non_sequences {
            non_sequence_values.push(self.tensor_operand(asg_id, *id)?);
        }

        let body_asg = self
            .graphs
            .get(body)
            .ok_or(RuntimeError::GraphNotFound(body))?;
        let slots = sequences.len() + states.len() + non_sequence_values.len();
        if body_asg.inputs.len() != slots || body_asg.outputs.len() != states.len() {
            return Err(RuntimeError::ShapeError(format!(
                "scan expects a body with {} inputs and {} outputs, got {} and {}",
                slots,
                states.len(),
                body_asg.inputs.len(),
                body_asg.outputs.len()
            )));
        }

        let mut stacked: Vec<Vec<ArrayD<f32>>> = vec![Vec::with_capacity(steps); states.len()];
        for step in 0..steps {
            // Тело вычисляется в собственном под-контексте: его узлы
            // перепривязываются на каждом шаге.
            let mut sub = ExecutionContext::new(self.graphs, self.inputs);
            for (slot, input_node) in body_asg.inputs.iter().enumerate() {
                let value = if slot < sequences.len() {
                    sequence_values[slot].index_axis(Axis(0), step).to_owned()
                } else if slot < sequences.len() + states.len() {
                    states[slot - sequences.len()].clone()
                } else {
                    non_sequence_values[slot - sequences.len() - states.len()].clone()
                };
                sub.memo.insert((body, *input_node), Slot::One(Value::Tensor(value)));
            }
            let mut new_states = Vec::with_capacity(states.len());
            for output in &body_asg.outputs {
                new_states.push(as_tensor(sub.evaluate_node(body, *output)?)?);
            }
            states = new_states;
            for (i, state) in states.iter().enumerate() {
                stacked[i].push(state.clone());
            }
        }

        let mut outputs = Vec::with_capacity(stacked.len());
        for frames in &stacked {
            let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
            let joined = ndarray::stack(Axis(0), &views)
                .map_err(|e| RuntimeError::ShapeError(format!("scan stack: {}", e)))?;
            outputs.push(Value::Tensor(joined));
        }
        Ok(outputs)
    }
}

/// Публичная структура Интерпретатора.
pub struct Interpreter;

impl Interpreter {
    pub fn new() -> Self {
        Self
    }

    /// Выполняет графы контекста и возвращает значения запрошенных выходов.
    ///
    /// Значения learned/fixed параметров берутся из реестра контекста;
    /// датасеты и прочие входы подаются через `feed` по именам (и имеют
    /// приоритет над реестром - так внешний цикл обучения подставляет
    /// обновлённые параметры).
    pub fn run(
        &self,
        context: &GraphContext,
        outputs: &[&crate::tensor::Tensor],
        feed: &HashMap<String, Value>,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut inputs = context.bindings();
        for (name, value) in feed {
            inputs.insert(name.clone(), value.clone());
        }
        let mut execution = ExecutionContext::new(context.graphs(), &inputs);
        outputs
            .iter()
            .map(|t| execution.evaluate_node(t.asg_id, t.node_id))
            .collect()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

// --- Реализации конкретных операций ---

fn as_tensor(value: Value) -> Result<ArrayD<f32>, RuntimeError> {
    match value {
        Value::Tensor(a) => Ok(a),
        Value::ScalarF32(v) => Ok(arr0(v).into_dyn()),
    }
}

fn check_axis(a: &ArrayD<f32>, axis: usize) -> Result<(), RuntimeError> {
    if axis >= a.ndim() {
        return Err(RuntimeError::ShapeError(format!(
            "axis {} out of range for rank {}",
            axis,
            a.ndim()
        )));
    }
    Ok(())
}

/// Поэлементная операция с взаимной трансляцией формы в стиле numpy:
/// формы выравниваются по хвостовым измерениям, единичные растягиваются.
fn op_broadcast_binary(
    lhs: &ArrayD<f32>,
    rhs: &ArrayD<f32>,
    f: impl Fn(f32, f32) -> f32,
) -> Result<ArrayD<f32>, RuntimeError> {
    let target = broadcast_shapes(&lhs.shape().to_vec(), &rhs.shape().to_vec())
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
    let lhs_b = lhs
        .broadcast(IxDyn(&target))
        .ok_or_else(|| RuntimeError::ShapeError(format!(
            "cannot broadcast {:?} to {:?}",
            lhs.shape(),
            target
        )))?;
    let rhs_b = rhs
        .broadcast(IxDyn(&target))
        .ok_or_else(|| RuntimeError::ShapeError(format!(
            "cannot broadcast {:?} to {:?}",
            rhs.shape(),
            target
        )))?;
    let mut out = ArrayD::zeros(IxDyn(&target));
    Zip::from(&mut out)
        .and(&lhs_b)
        .and(&rhs_b)
        .for_each(|o, &a, &b| *o = f(a, b));
    Ok(out)
}

fn op_matmul(lhs: ArrayD<f32>, rhs: ArrayD<f32>) -> Result<Value, RuntimeError> {
    if rhs.ndim() != 2 {
        return Err(RuntimeError::ShapeError(format!(
            "matmul rhs must be a matrix, got rank {}",
            rhs.ndim()
        )));
    }
    let rhs_mat = rhs
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| RuntimeError::ShapeError(format!("matmul rhs: {}", e)))?;

    match lhs.ndim() {
        // Обычное матричное умножение
        2 => {
            let lhs_mat = lhs
                .view()
                .into_dimensionality::<Ix2>()
                .map_err(|e| RuntimeError::ShapeError(format!("matmul lhs: {}", e)))?;
            if lhs_mat.shape()[1] != rhs_mat.shape()[0] {
                return Err(RuntimeError::ShapeError(format!(
                    "incompatible shapes for matmul: {:?} and {:?}",
                    lhs.shape(),
                    rhs.shape()
                )));
            }
            Ok(Value::Tensor(lhs_mat.dot(&rhs_mat).into_dyn()))
        }
        // Проекция всей последовательности: (time, batch, in) . (in, out)
        3 => {
            let (t, b, k) = (lhs.shape()[0], lhs.shape()[1], lhs.shape()[2]);
            if k != rhs_mat.shape()[0] {
                return Err(RuntimeError::ShapeError(format!(
                    "incompatible shapes for matmul: {:?} and {:?}",
                    lhs.shape(),
                    rhs.shape()
                )));
            }
            let flat: Array2<f32> = lhs
                .as_standard_layout()
                .to_owned()
                .into_shape((t * b, k))
                .map_err(|e| RuntimeError::ShapeError(format!("matmul flatten: {}", e)))?
                .into_dimensionality::<Ix2>()
                .map_err(|e| RuntimeError::ShapeError(format!("matmul flatten: {}", e)))?;
            let product = flat.dot(&rhs_mat);
            let n = product.shape()[1];
            let restored = product
                .into_shape(IxDyn(&[t, b, n]))
                .map_err(|e| RuntimeError::ShapeError(format!("matmul restore: {}", e)))?;
            Ok(Value::Tensor(restored))
        }
        other => Err(RuntimeError::UnimplementedOperation(format!(
            "matmul for lhs of rank {}",
            other
        ))),
    }
}

fn op_power(base: ArrayD<f32>, power: ArrayD<f32>) -> Result<Value, RuntimeError> {
    if power.ndim() != 0 {
        return Err(RuntimeError::TypeError {
            expected: "scalar power".to_string(),
            actual: format!("rank {}", power.ndim()),
        });
    }
    let p = *power
        .first()
        .ok_or_else(|| RuntimeError::ShapeError("empty power operand".into()))?;
    Ok(Value::Tensor(base.mapv(|v| v.powf(p))))
}

fn op_reshape(a: ArrayD<f32>, requested: &[i64]) -> Result<Value, RuntimeError> {
    let count = a.len();
    let known: i64 = requested.iter().filter(|&&d| d != -1).product();
    let mut resolved = Vec::with_capacity(requested.len());
    for &d in requested {
        if d == -1 {
            if known <= 0 || count % known as usize != 0 {
                return Err(RuntimeError::ShapeError(format!(
                    "cannot reshape {} elements into {:?}",
                    count, requested
                )));
            }
            resolved.push(count / known as usize);
        } else {
            resolved.push(d as usize);
        }
    }
    a.as_standard_layout()
        .to_owned()
        .into_shape(IxDyn(&resolved))
        .map(Value::Tensor)
        .map_err(|e| RuntimeError::ShapeError(format!("reshape: {}", e)))
}

fn op_transpose(a: ArrayD<f32>, axis1: usize, axis2: usize) -> Result<Value, RuntimeError> {
    let mut axes: Vec<_> = (0..a.ndim()).collect();
    if axis1 >= axes.len() || axis2 >= axes.len() {
        return Err(RuntimeError::ShapeError(
            "invalid axes for transpose".to_string(),
        ));
    }
    axes.swap(axis1, axis2);
    let permuted = a.view().permuted_axes(axes).as_standard_layout().to_owned();
    Ok(Value::Tensor(permuted))
}

fn op_time_shift(a: ArrayD<f32>) -> Result<Value, RuntimeError> {
    if a.ndim() == 0 {
        return Err(RuntimeError::ShapeError("time shift of a scalar".into()));
    }
    let steps = a.shape()[0];
    let mut out = ArrayD::zeros(a.raw_dim());
    if steps > 1 {
        out.slice_axis_mut(Axis(0), Slice::from(1..))
            .assign(&a.slice_axis(Axis(0), Slice::from(..steps - 1)));
    }
    Ok(Value::Tensor(out))
}

fn op_gather(table: ArrayD<f32>, indices: ArrayD<f32>) -> Result<Value, RuntimeError> {
    if table.ndim() != 2 {
        return Err(RuntimeError::ShapeError(format!(
            "gather table must be a matrix, got rank {}",
            table.ndim()
        )));
    }
    let rows = table.shape()[0];
    let mut picked = Vec::with_capacity(indices.len());
    for &raw in indices.iter() {
        let index = raw.round() as usize;
        if index >= rows {
            return Err(RuntimeError::ShapeError(format!(
                "gather index {} out of range for table of {} rows",
                index, rows
            )));
        }
        picked.push(index);
    }
    let selected = table.select(Axis(0), &picked);
    let mut out_shape = indices.shape().to_vec();
    out_shape.push(table.shape()[1]);
    selected
        .into_shape(IxDyn(&out_shape))
        .map(Value::Tensor)
        .map_err(|e| RuntimeError::ShapeError(format!("gather reshape: {}", e)))
}

fn op_categorical_sample(pvals: ArrayD<f32>, seed: i64) -> Result<Value, RuntimeError> {
    if pvals.ndim() != 2 {
        return Err(RuntimeError::ShapeError(format!(
            "categorical sample expects (batch, classes), got rank {}",
            pvals.ndim()
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed as u64);
    let mut out = ArrayD::zeros(pvals.raw_dim());
    let classes = pvals.shape()[1];
    for (row, mut out_row) in pvals
        .axis_iter(Axis(0))
        .zip(out.axis_iter_mut(Axis(0)))
    {
        let draw: f32 = rng.gen();
        let mut cumulative = 0.0;
        let mut chosen = classes - 1;
        for (class, &p) in row.iter().enumerate() {
            cumulative += p;
            if draw < cumulative {
                chosen = class;
                break;
            }
        }
        out_row[[chosen]] = 1.0;
    }
    Ok(Value::Tensor(out))
}

fn op_dropout(
    a: ArrayD<f32>,
    switch: ArrayD<f32>,
    prob: f32,
    seed: i64,
) -> Result<Value, RuntimeError> {
    if switch.ndim() != 0 {
        return Err(RuntimeError::TypeError {
            expected: "scalar dropout switch".to_string(),
            actual: format!("rank {}", switch.ndim()),
        });
    }
    let exponent = *switch
        .first()
        .ok_or_else(|| RuntimeError::ShapeError("empty dropout switch".into()))?;
    let retain = 1.0 - prob;
    let mask_shape: Vec<usize> = match a.ndim() {
        2 => a.shape().to_vec(),
        // Для последовательностей маска общая по оси времени
        3 => a.shape()[1..].to_vec(),
        other => {
            return Err(RuntimeError::ShapeError(format!(
                "dropout expects rank 2 or 3, got {}",
                other
            )));
        }
    };
    let mut rng = StdRng::seed_from_u64(seed as u64);
    let mut mask = ArrayD::<f32>::zeros(IxDyn(&mask_shape));
    mask.mapv_inplace(|_| if rng.gen::<f32>() < retain { 1.0 } else { 0.0 });
    // switch = 0 превращает маску в единицы: тот же граф работает в инференсе
    let gated = mask.mapv(|m| m.powf(exponent));
    let dropped = op_broadcast_binary(&a, &gated, |x, m| x * m)?;
    Ok(Value::Tensor(dropped / retain))
}
