//! Модуль, определяющий `Tensor` и `GraphContext`.
//!
//! `Tensor` не является контейнером для данных. Это легковесный "дескриптор"
//! (handle), который представляет узел в `Абстрактном Семантическом Графе`
//! (ASG). Все операции над тензорами (`add`, `dot` и т.д.) не выполняют
//! вычисления немедленно, а добавляют соответствующие узлы в граф.
//!
//! `GraphContext` - это центральный объект, который владеет построением
//! ASG и реестром именованных тензоров: обучаемых параметров, фиксированных
//! констант, шумовых источников и датасетов. Реестр гарантирует глобальную
//! уникальность имён (strict-режим) и хранит объявленную форму, вид и
//! начальное значение каждой записи. Порядок вставки сохраняется, чтобы
//! перечисление параметров было детерминированным.
//!
//! Контекст оборачивается в `Rc<RefCell<>>` и передаётся каждому строителю
//! слоёв явно: им владеет вызывающая сторона, слои только добавляют записи.
//! Построение графа однопоточное, одноразовое; откат частично построенного
//! графа не предусмотрен - восстановление после ошибки это перезапуск
//! всего скрипта построения.

use crate::analysis::shape_inference::{infer_node_shape, ShapeInferenceError};
use crate::asg::{Asg, AsgError, AsgId, DType, NodeId, NodeType, Shape, Value};
use ndarray::ArrayD;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;
use thiserror::Error;

/// Ошибки построения графа и работы с реестром имён.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Имя '{0}' уже зарегистрировано в графе (strict-режим)")]
    DuplicateName(String),

    #[error("Имя '{0}' уже зарегистрировано; повторная привязка узла не поддерживается. \
             Для разделения весов используйте явную операцию bind/fetch.")]
    UnsupportedReuse(String),

    #[error("Имя '{0}' не найдено в графе")]
    MissingName(String),

    #[error("Вход '{name}' имеет ранг {actual}, ожидался ранг {expected}")]
    InvalidRank {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Вход '{name}' должен быть одномерным целочисленным вектором индексов")]
    InvalidIndexInput { name: String },

    #[error("Ширина скрытого состояния {actual} не совпадает с шириной контекста кодировщика {expected}")]
    ContextWidthMismatch { expected: usize, actual: usize },

    #[error("Ошибка инференса форм: {0}")]
    Shape(#[from] ShapeInferenceError),

    #[error("Ошибка графа: {0}")]
    Asg(#[from] AsgError),
}

/// Вид записи реестра.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// Обучаемый параметр - его будет обновлять внешний оптимизатор.
    Learned,
    /// Фиксированная константа (например, предвычисленная PCA-матрица).
    Fixed,
    /// Шумовой источник, зарегистрированный для воспроизводимости.
    Random,
    /// Символический вход, привязанный к внешнему датасету.
    Dataset,
}

/// Одна запись реестра: узел графа плюс метаданные.
#[derive(Debug, Clone)]
pub struct ParamEntry {
    pub asg_id: AsgId,
    pub node_id: NodeId,
    pub shape: Shape,
    pub dtype: DType,
    pub kind: ParamKind,
    /// Начальное значение для learned/fixed записей; датасеты и шум
    /// материализуются на этапе выполнения.
    pub value: Option<ArrayD<f32>>,
    /// Производный seed шумового источника.
    pub seed: Option<i64>,
    /// Метка датасета-источника для dataset-записей.
    pub source: Option<String>,
}

/// Контекст, который владеет построением всех ASG (главный граф плюс
/// подграфы-тела scan) и реестром именованных тензоров.
#[derive(Debug, Clone)]
pub struct GraphContext {
    graphs: Vec<Asg>,
    entries: HashMap<String, ParamEntry>,
    /// Порядок регистрации имён - для детерминированного перечисления.
    order: Vec<String>,
}

/// Главный граф всегда имеет ID 0.
pub const MAIN_GRAPH: AsgId = 0;

impl GraphContext {
    /// Создает новый контекст с пустым главным графом.
    pub fn new() -> Self {
        Self {
            graphs: vec![Asg::new(MAIN_GRAPH)],
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn main_graph(&self) -> &Asg {
        &self.graphs[MAIN_GRAPH]
    }

    pub fn main_graph_mut(&mut self) -> &mut Asg {
        &mut self.graphs[MAIN_GRAPH]
    }

    /// Все графы контекста; индекс в срезе совпадает с `AsgId`.
    pub fn graphs(&self) -> &[Asg] {
        &self.graphs
    }

    pub fn graph(&self, id: AsgId) -> Result<&Asg, GraphError> {
        self.graphs.get(id).ok_or(GraphError::Asg(AsgError::AsgNotFound(id)))
    }

    /// Заводит новый пустой подграф (тело scan) и возвращает его ID.
    pub fn new_subgraph(&mut self) -> AsgId {
        let id = self.graphs.len();
        self.graphs.push(Asg::new(id));
        id
    }

    /// Объявляет выходы подграфа.
    pub fn set_subgraph_outputs(&mut self, asg_id: AsgId, outputs: &[&Tensor]) {
        let ids: Vec<NodeId> = outputs.iter().map(|t| t.node_id).collect();
        self.graphs[asg_id].set_outputs(ids);
    }

    /// Вставляет узел-операцию и немедленно выводит его форму и dtype.
    /// Узел с невыводимой формой остаётся в графе: построение одноразовое,
    /// ошибка фатальна для всего скрипта.
    pub fn insert_op(
        &mut self,
        asg_id: AsgId,
        name: Option<String>,
        node_type: NodeType,
    ) -> Result<NodeId, GraphError> {
        let node_id = self.graphs[asg_id].add_node(name, node_type);
        if self.graphs[asg_id].get_node(node_id)?.shape.is_none() {
            let (shape, dtype) = infer_node_shape(&self.graphs, asg_id, node_id)?;
            let node = self.graphs[asg_id].get_node_mut(node_id)?;
            node.shape = Some(shape);
            node.dtype = Some(dtype);
        }
        Ok(node_id)
    }

    /// Вставляет узел-данные с объявленной формой (инференсу тут нечего
    /// выводить - форма приходит от датасета или инициализатора).
    fn insert_data_node(
        &mut self,
        asg_id: AsgId,
        name: Option<String>,
        node_type: NodeType,
        shape: Shape,
        dtype: DType,
    ) -> NodeId {
        let node_id = self.graphs[asg_id].add_node(name, node_type);
        // Узел только что создан, get_node_mut не может не найти его.
        if let Ok(node) = self.graphs[asg_id].get_node_mut(node_id) {
            node.shape = Some(shape);
            node.dtype = Some(dtype);
        }
        node_id
    }

    // --- Реестр ---

    /// Истина, если каждое из имён уже зарегистрировано.
    pub fn names_in_graph(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.entries.contains_key(*n))
    }

    pub fn entry(&self, name: &str) -> Option<&ParamEntry> {
        self.entries.get(name)
    }

    /// Регистрирует запись; коллизия имён - ошибка в обоих режимах,
    /// различается только её диагноз (см. GraphError).
    fn register(&mut self, name: &str, entry: ParamEntry, strict: bool) -> Result<(), GraphError> {
        if self.entries.contains_key(name) {
            return Err(if strict {
                GraphError::DuplicateName(name.to_string())
            } else {
                GraphError::UnsupportedReuse(name.to_string())
            });
        }
        self.entries.insert(name.to_string(), entry);
        self.order.push(name.to_string());
        Ok(())
    }

    /// Объявленная форма выражения, прослеживаемого до узла графа.
    pub fn expected_dims(&self, tensor: &Tensor) -> Result<Shape, GraphError> {
        let node = self.graph(tensor.asg_id)?.get_node(tensor.node_id)?;
        node.shape
            .clone()
            .ok_or(GraphError::Shape(ShapeInferenceError::MissingShapeInfo(tensor.node_id)))
    }

    fn declared_dtype(&self, tensor: &Tensor) -> Result<DType, GraphError> {
        let node = self.graph(tensor.asg_id)?.get_node(tensor.node_id)?;
        Ok(node.dtype.unwrap_or(DType::F32))
    }

    /// Имена обучаемых параметров в порядке регистрации - точка интеграции
    /// для внешнего оптимизатора.
    pub fn learned_parameters(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|n| matches!(self.entries[*n].kind, ParamKind::Learned))
            .cloned()
            .collect()
    }

    /// Начальные значения learned/fixed записей для среды выполнения.
    /// Датасеты подаются вызывающей стороной отдельно.
    pub fn bindings(&self) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for (name, entry) in &self.entries {
            if let Some(value) = &entry.value {
                out.insert(name.clone(), Value::Tensor(value.clone()));
            }
        }
        out
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Общий тип разделяемого контекста.
pub type SharedGraph = Rc<RefCell<GraphContext>>;

/// Создает новый разделяемый контекст.
pub fn shared_graph() -> SharedGraph {
    Rc::new(RefCell::new(GraphContext::new()))
}

// --- Функции регистрации (контракт реестра) ---

fn register_arrays(
    context: &SharedGraph,
    arrays: Vec<ArrayD<f32>>,
    names: &[&str],
    kind: ParamKind,
    strict: bool,
) -> Result<Vec<Tensor>, GraphError> {
    let mut out = Vec::with_capacity(arrays.len());
    for (array, name) in arrays.into_iter().zip(names.iter()) {
        let shape = array.shape().to_vec();
        let node_id = {
            let mut ctx = context.borrow_mut();
            if ctx.entries.contains_key(*name) {
                return Err(if strict {
                    GraphError::DuplicateName(name.to_string())
                } else {
                    GraphError::UnsupportedReuse(name.to_string())
                });
            }
            let node_id = ctx.insert_data_node(
                MAIN_GRAPH,
                Some(name.to_string()),
                NodeType::Parameter { name: name.to_string() },
                shape.clone(),
                DType::F32,
            );
            let entry = ParamEntry {
                asg_id: MAIN_GRAPH,
                node_id,
                shape,
                dtype: DType::F32,
                kind,
                value: Some(array),
                seed: None,
                source: None,
            };
            ctx.register(name, entry, strict)?;
            node_id
        };
        out.push(Tensor::from_parts(context, MAIN_GRAPH, node_id));
    }
    Ok(out)
}

/// Регистрирует массивы как обучаемые параметры и возвращает их дескрипторы.
pub fn add_learned_to_graph(
    context: &SharedGraph,
    arrays: Vec<ArrayD<f32>>,
    names: &[&str],
    strict: bool,
) -> Result<Vec<Tensor>, GraphError> {
    register_arrays(context, arrays, names, ParamKind::Learned, strict)
}

/// Регистрирует массивы как фиксированные (необучаемые) константы.
pub fn add_fixed_to_graph(
    context: &SharedGraph,
    arrays: Vec<ArrayD<f32>>,
    names: &[&str],
    strict: bool,
) -> Result<Vec<Tensor>, GraphError> {
    register_arrays(context, arrays, names, ParamKind::Fixed, strict)
}

/// Регистрирует символические входы, привязанные к внешним датасетам.
/// Значения не сохраняются - их подаёт вызывающая сторона на этапе
/// выполнения; запись хранит форму, dtype и метку источника.
pub fn add_datasets_to_graph(
    context: &SharedGraph,
    datasets: &[(&str, &ArrayD<f32>, DType)],
) -> Result<Vec<Tensor>, GraphError> {
    let mut out = Vec::with_capacity(datasets.len());
    for (name, array, dtype) in datasets {
        let shape = array.shape().to_vec();
        let node_id = {
            let mut ctx = context.borrow_mut();
            if ctx.entries.contains_key(*name) {
                return Err(GraphError::DuplicateName(name.to_string()));
            }
            let node_id = ctx.insert_data_node(
                MAIN_GRAPH,
                Some(name.to_string()),
                NodeType::Input { name: name.to_string() },
                shape.clone(),
                *dtype,
            );
            let entry = ParamEntry {
                asg_id: MAIN_GRAPH,
                node_id,
                shape,
                dtype: *dtype,
                kind: ParamKind::Dataset,
                value: None,
                seed: None,
                source: Some(name.to_string()),
            };
            ctx.register(name, entry, true)?;
            node_id
        };
        out.push(Tensor::from_parts(context, MAIN_GRAPH, node_id));
    }
    Ok(out)
}

/// Регистрирует уже построенные шумовые узлы под их именами - для
/// интроспекции графа и воспроизводимости выборок.
pub fn add_random_to_graph(
    context: &SharedGraph,
    tensors: &[&Tensor],
    names: &[&str],
) -> Result<(), GraphError> {
    let mut ctx = context.borrow_mut();
    for (tensor, name) in tensors.iter().zip(names.iter()) {
        let node = ctx.graph(tensor.asg_id)?.get_node(tensor.node_id)?;
        let seed = match &node.node_type {
            NodeType::NormalNoise { seed, .. } => Some(*seed),
            NodeType::CategoricalSample { seed, .. } => Some(*seed),
            _ => None,
        };
        let shape = node
            .shape
            .clone()
            .ok_or(GraphError::Shape(ShapeInferenceError::MissingShapeInfo(tensor.node_id)))?;
        let dtype = node.dtype.unwrap_or(DType::F32);
        let entry = ParamEntry {
            asg_id: tensor.asg_id,
            node_id: tensor.node_id,
            shape,
            dtype,
            kind: ParamKind::Random,
            value: None,
            seed,
            source: None,
        };
        ctx.register(name, entry, true)?;
    }
    Ok(())
}

/// Возвращает дескриптор для каждого запрошенного имени, в порядке запроса.
pub fn fetch_from_graph(
    context: &SharedGraph,
    names: &[&str],
) -> Result<Vec<Tensor>, GraphError> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let (asg_id, node_id) = {
            let ctx = context.borrow();
            let entry = ctx
                .entry(name)
                .ok_or_else(|| GraphError::MissingName(name.to_string()))?;
            (entry.asg_id, entry.node_id)
        };
        out.push(Tensor::from_parts(context, asg_id, node_id));
    }
    Ok(out)
}

/// Истина, если каждое из имён уже зарегистрировано.
pub fn names_in_graph(context: &SharedGraph, names: &[&str]) -> bool {
    context.borrow().names_in_graph(names)
}

/// Объявленная форма выражения (см. `GraphContext::expected_dims`).
pub fn calc_expected_dims(context: &SharedGraph, tensor: &Tensor) -> Result<Shape, GraphError> {
    context.borrow().expected_dims(tensor)
}

/// Символьный дескриптор, представляющий узел в графе вычислений (ASG).
///
/// Этот объект не содержит реальных данных. Он состоит из ID графа, ID узла
/// и ссылки на `GraphContext`, в котором этот узел существует. Любая
/// операция над этим объектом приводит к добавлению нового узла в граф.
#[derive(Debug, Clone)]
pub struct Tensor {
    /// ID графа, которому принадлежит узел (главный граф или тело scan).
    pub asg_id: AsgId,
    /// ID узла в ASG, который представляет этот тензор.
    pub node_id: NodeId,
    /// Разделяемая ссылка на контекст, в котором строится граф.
    pub context: SharedGraph,
}

impl Tensor {
    pub(crate) fn from_parts(context: &SharedGraph, asg_id: AsgId, node_id: NodeId) -> Self {
        Self { asg_id, node_id, context: Rc::clone(context) }
    }

    /// Скалярный литерал в том же графе, что и `self` (нужно для тел scan).
    pub fn scalar_like(&self, value: f32) -> Self {
        let node_id = self
            .context
            .borrow_mut()
            .graphs[self.asg_id]
            .add_node(None, NodeType::Literal(Value::ScalarF32(value)));
        Self::from_parts(&self.context, self.asg_id, node_id)
    }

    /// Источник стандартного нормального шума объявленной формы.
    /// Узел создаётся, но не регистрируется - регистрацию выполняет
    /// `add_random_to_graph`.
    pub fn normal_noise(context: &SharedGraph, name: &str, shape: Shape, seed: i64) -> Self {
        let node_id = context.borrow_mut().insert_data_node(
            MAIN_GRAPH,
            Some(name.to_string()),
            NodeType::NormalNoise { name: name.to_string(), seed },
            shape,
            DType::F32,
        );
        Self::from_parts(context, MAIN_GRAPH, node_id)
    }

    /// Вход подграфа (тела scan) с объявленной формой.
    pub fn subgraph_input(
        context: &SharedGraph,
        asg_id: AsgId,
        name: &str,
        shape: Shape,
        dtype: DType,
    ) -> Self {
        let node_id = {
            let mut ctx = context.borrow_mut();
            let node_id = ctx.insert_data_node(
                asg_id,
                Some(name.to_string()),
                NodeType::Input { name: name.to_string() },
                shape,
                dtype,
            );
            ctx.graphs[asg_id].inputs.push(node_id);
            node_id
        };
        Self::from_parts(context, asg_id, node_id)
    }

    /// Внутренний помощник: добавляет узел-операцию в граф `self`.
    /// Ошибка построения фатальна: граф строится один раз, сверху вниз,
    /// и восстановление - это перезапуск всего скрипта.
    fn push_op(&self, node_type: NodeType) -> Self {
        let node_id = self
            .context
            .borrow_mut()
            .insert_op(self.asg_id, None, node_type)
            .unwrap_or_else(|e| panic!("graph construction failed: {e}"));
        Self::from_parts(&self.context, self.asg_id, node_id)
    }

    // --- Математические операции ---

    pub fn dot(&self, other: &Tensor) -> Self {
        self.push_op(NodeType::MatrixMultiply(self.node_id, other.node_id))
    }

    pub fn pow_scalar(&self, power: f32) -> Self {
        let p = self.scalar_like(power);
        self.push_op(NodeType::Power(self.node_id, p.node_id))
    }

    // --- Функции активации и поэлементные функции ---

    pub fn tanh(&self) -> Self {
        self.push_op(NodeType::Tanh(self.node_id))
    }

    pub fn sigmoid(&self) -> Self {
        self.push_op(NodeType::Sigmoid(self.node_id))
    }

    pub fn relu(&self) -> Self {
        self.push_op(NodeType::ReLU(self.node_id))
    }

    pub fn softplus(&self) -> Self {
        self.push_op(NodeType::Softplus(self.node_id))
    }

    pub fn exp(&self) -> Self {
        self.push_op(NodeType::Exp(self.node_id))
    }

    pub fn log(&self) -> Self {
        self.push_op(NodeType::Log(self.node_id))
    }

    // --- Операции редукции (keepdim=1) ---

    pub fn sum_axis(&self, axis: usize) -> Self {
        self.push_op(NodeType::SumAxis { input: self.node_id, axis })
    }

    pub fn max_axis(&self, axis: usize) -> Self {
        self.push_op(NodeType::MaxAxis { input: self.node_id, axis })
    }

    pub fn mean_axis(&self, axis: usize) -> Self {
        self.push_op(NodeType::MeanAxis { input: self.node_id, axis })
    }

    /// Среднее по всем элементам (скаляр).
    pub fn mean(&self) -> Self {
        self.push_op(NodeType::Mean(self.node_id))
    }

    // --- Операции трансформации ---

    pub fn reshape(&self, shape: Vec<i64>) -> Self {
        self.push_op(NodeType::Reshape { input: self.node_id, shape })
    }

    pub fn transpose(&self, axis1: usize, axis2: usize) -> Self {
        self.push_op(NodeType::Transpose(self.node_id, axis1, axis2))
    }

    pub fn expand_dims(&self, axis: usize) -> Self {
        self.push_op(NodeType::ExpandDims(self.node_id, axis))
    }

    pub fn slice_axis(&self, axis: usize, start: usize, len: usize) -> Self {
        self.push_op(NodeType::SliceAxis { input: self.node_id, axis, start, len })
    }

    pub fn index_axis(&self, axis: usize, index: isize) -> Self {
        self.push_op(NodeType::IndexAxis { input: self.node_id, axis, index })
    }

    pub fn reverse(&self, axis: usize) -> Self {
        self.push_op(NodeType::Reverse { input: self.node_id, axis })
    }

    pub fn time_shift(&self) -> Self {
        self.push_op(NodeType::TimeShift(self.node_id))
    }

    pub fn zeros_like(&self) -> Self {
        self.push_op(NodeType::ZerosLike(self.node_id))
    }

    pub fn ones_like(&self) -> Self {
        self.push_op(NodeType::OnesLike(self.node_id))
    }

    /// Выбор строк `self` (таблицы) по целочисленным индексам.
    pub fn gather(&self, indices: &Tensor) -> Self {
        self.push_op(NodeType::Gather { table: self.node_id, indices: indices.node_id })
    }

    /// Конкатенация нескольких тензоров по заданной оси.
    pub fn concat(tensors: &[&Tensor], axis: usize) -> Self {
        let first = tensors[0];
        if tensors.len() == 1 {
            return first.clone();
        }
        let inputs: Vec<NodeId> = tensors.iter().map(|t| t.node_id).collect();
        first.push_op(NodeType::Concat { inputs, axis })
    }

    // --- Стохастические узлы ---

    /// Категориальная выборка: `self` - вероятности по последней оси.
    pub fn categorical_sample(&self, name: &str, seed: i64) -> Self {
        self.push_op(NodeType::CategoricalSample {
            pvals: self.node_id,
            name: name.to_string(),
            seed,
        })
    }

    /// Dropout с внешним переключателем обучение/инференс.
    pub fn dropout(&self, switch: &Tensor, prob: f32, seed: i64) -> Self {
        self.push_op(NodeType::Dropout {
            input: self.node_id,
            switch: switch.node_id,
            prob,
            seed,
        })
    }

    // --- Управляющие узлы ---

    /// Последовательная свёртка тела `body` по оси времени.
    /// Выходы достаются через [`Tensor::scan_output`].
    pub fn scan(
        context: &SharedGraph,
        body: AsgId,
        sequences: &[&Tensor],
        initial_states: &[&Tensor],
        non_sequences: &[&Tensor],
    ) -> Self {
        let node_type = NodeType::Scan {
            body,
            sequences: sequences.iter().map(|t| t.node_id).collect(),
            initial_states: initial_states.iter().map(|t| t.node_id).collect(),
            non_sequences: non_sequences.iter().map(|t| t.node_id).collect(),
        };
        let node_id = context
            .borrow_mut()
            .insert_op(MAIN_GRAPH, None, node_type)
            .unwrap_or_else(|e| panic!("graph construction failed: {e}"));
        Self::from_parts(context, MAIN_GRAPH, node_id)
    }

    /// Извлечение i-го выхода узла Scan (стек состояний по времени).
    pub fn scan_output(&self, index: usize) -> Self {
        self.push_op(NodeType::ScanOutput { scan: self.node_id, index })
    }

    /// Объявленная форма этого выражения.
    pub fn expected_dims(&self) -> Result<Shape, GraphError> {
        self.context.borrow().expected_dims(self)
    }

    /// Объявленный dtype этого выражения.
    pub fn dtype(&self) -> Result<DType, GraphError> {
        self.context.borrow().declared_dtype(self)
    }
}

// Реализация операторов для удобного синтаксиса `a + b`.

impl Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Self::Output {
        self.push_op(NodeType::Add(self.node_id, rhs.node_id))
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: &Tensor) -> Self::Output {
        self.push_op(NodeType::Subtract(self.node_id, rhs.node_id))
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: &Tensor) -> Self::Output {
        self.push_op(NodeType::Multiply(self.node_id, rhs.node_id))
    }
}

impl Div<&Tensor> for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: &Tensor) -> Self::Output {
        self.push_op(NodeType::Divide(self.node_id, rhs.node_id))
    }
}

impl Neg for &Tensor {
    type Output = Tensor;
    fn neg(self) -> Self::Output {
        self.push_op(NodeType::Negate(self.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn zeros(shape: &[usize]) -> ArrayD<f32> {
        ArrayD::zeros(ndarray::IxDyn(shape))
    }

    #[test]
    fn duplicate_name_fails_in_strict_mode() {
        let ctx = shared_graph();
        add_learned_to_graph(&ctx, vec![zeros(&[2, 3])], &["w"], true).unwrap();
        let err = add_learned_to_graph(&ctx, vec![zeros(&[2, 3])], &["w"], true).unwrap_err();
        assert_eq!(err, GraphError::DuplicateName("w".to_string()));
    }

    #[test]
    fn duplicate_name_fails_as_unsupported_reuse_without_strict() {
        let ctx = shared_graph();
        add_learned_to_graph(&ctx, vec![zeros(&[4])], &["b"], true).unwrap();
        let err = add_learned_to_graph(&ctx, vec![zeros(&[4])], &["b"], false).unwrap_err();
        assert_eq!(err, GraphError::UnsupportedReuse("b".to_string()));
    }

    #[test]
    fn fetch_of_unregistered_name_fails() {
        let ctx = shared_graph();
        let err = fetch_from_graph(&ctx, &["nothing"]).unwrap_err();
        assert_eq!(err, GraphError::MissingName("nothing".to_string()));
    }

    #[test]
    fn registered_names_are_listed_in_insertion_order() {
        let ctx = shared_graph();
        add_learned_to_graph(&ctx, vec![zeros(&[2]), zeros(&[3])], &["w2", "w1"], true).unwrap();
        add_fixed_to_graph(&ctx, vec![zeros(&[5])], &["pca"], true).unwrap();
        assert_eq!(ctx.borrow().learned_parameters(), vec!["w2", "w1"]);
        assert!(ctx.borrow().names_in_graph(&["w1", "w2", "pca"]));
        assert!(!ctx.borrow().names_in_graph(&["w1", "missing"]));
    }

    #[test]
    fn expected_dims_follows_operations() {
        let ctx = shared_graph();
        let x = add_datasets_to_graph(&ctx, &[("x", &zeros(&[5, 3]), DType::F32)])
            .unwrap()
            .remove(0);
        let w = add_learned_to_graph(&ctx, vec![zeros(&[3, 4])], &["w"], true)
            .unwrap()
            .remove(0);
        let y = x.dot(&w);
        assert_eq!(y.expected_dims().unwrap(), vec![5, 4]);
        assert_eq!(calc_expected_dims(&ctx, &y.tanh()).unwrap(), vec![5, 4]);
    }
}
