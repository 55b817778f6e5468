//! ASG: Абстрактный семантический граф
//!
//! Граф описывает сеть символически: узлы-данные (входы-датасеты, обучаемые
//! параметры, шумовые источники) и узлы-операции над ними. Реальные значения
//! появляются только на этапе выполнения в `runtime`.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Идентификатор узла
pub type NodeId = usize;
/// Идентификатор графа
pub type AsgId = usize;
/// Форма тензора
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("Узел с ID {0} не найден")]
    NodeNotFound(NodeId),
    #[error("Граф с ID {0} не найден")]
    AsgNotFound(AsgId),
    #[error("Неверная форма у узла {0}")]
    InvalidShape(NodeId),
    #[error("Операция не поддерживается: {0}")]
    UnsupportedOperation(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    I32,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// ID узла (дублируем ключ HashMap для удобства вызовов в других модулях)
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub shape: Option<Shape>,
    pub dtype: Option<DType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    // Данные
    Input { name: String },
    Parameter { name: String },
    Literal(Value),
    /// Источник стандартного нормального шума фиксированной формы.
    /// Значение порождается бэкендом детерминированно из seed.
    NormalNoise { name: String, seed: i64 },
    /// Категориальная выборка: по одной one-hot строке на каждую строку pvals.
    CategoricalSample { pvals: NodeId, name: String, seed: i64 },

    // Бинарные
    Add(NodeId, NodeId),
    Subtract(NodeId, NodeId),
    Multiply(NodeId, NodeId),
    Divide(NodeId, NodeId),
    MatrixMultiply(NodeId, NodeId),
    Power(NodeId, NodeId),

    // Унарные
    Negate(NodeId),
    Exp(NodeId),
    Log(NodeId),
    Tanh(NodeId),
    Sigmoid(NodeId),
    ReLU(NodeId),
    Softplus(NodeId),

    // Редукции по одной оси, keepdim=1
    SumAxis { input: NodeId, axis: usize },
    MaxAxis { input: NodeId, axis: usize },
    MeanAxis { input: NodeId, axis: usize },
    /// Среднее по всем элементам (скаляр).
    Mean(NodeId),

    // Трансформации
    /// Новая форма задаётся явно; ровно одно измерение может быть -1.
    Reshape { input: NodeId, shape: Vec<i64> },
    Transpose(NodeId, usize, usize),
    ExpandDims(NodeId, usize),
    Concat { inputs: Vec<NodeId>, axis: usize },
    SliceAxis { input: NodeId, axis: usize, start: usize, len: usize },
    /// Выбор одного индекса по оси (ранг уменьшается на единицу).
    /// Отрицательный индекс отсчитывается с конца, как в numpy.
    IndexAxis { input: NodeId, axis: usize, index: isize },
    Reverse { input: NodeId, axis: usize },
    /// Сдвиг по временной оси (ось 0) на один шаг вперёд, нулевое заполнение
    /// первого шага. Подготовка входа для teacher forcing.
    TimeShift(NodeId),
    ZerosLike(NodeId),
    OnesLike(NodeId),
    /// Выбор строк таблицы по целочисленным индексам (embedding lookup).
    Gather { table: NodeId, indices: NodeId },

    // Регуляризация
    /// Бинарная маска Бернулли, возводимая в степень switch (0 или 1),
    /// с масштабированием 1/(1-prob). Для ранга 3 маска общая по оси времени.
    Dropout { input: NodeId, switch: NodeId, prob: f32, seed: i64 },

    // Управляющие
    /// Последовательная свёртка по оси времени: тело body выполняется на
    /// каждом шаге, состояния протягиваются между шагами.
    /// Входы тела связываются позиционно: [срезы sequences, состояния,
    /// non_sequences]. Выходы тела — новые состояния; их столько же, сколько
    /// initial_states, и все они складываются в стек по времени.
    Scan {
        body: AsgId,
        sequences: Vec<NodeId>,
        initial_states: Vec<NodeId>,
        non_sequences: Vec<NodeId>,
    },
    /// Извлечение i-го выхода узла Scan.
    ScanOutput { scan: NodeId, index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(ArrayD<f32>),
    ScalarF32(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asg {
    pub id: AsgId,
    pub nodes: HashMap<NodeId, Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Asg {
    pub fn new(id: AsgId) -> Self {
        Self { id, nodes: HashMap::new(), inputs: vec![], outputs: vec![] }
    }

    /// Вставляет узел без формы; форму и dtype проставляет владелец графа
    /// (`GraphContext`) сразу после вставки, через инференс форм.
    pub fn add_node(&mut self, name: Option<String>, node_type: NodeType) -> NodeId {
        let new_id = self.nodes.len();
        let mut node = Node { id: new_id, name, node_type, shape: None, dtype: None };

        // Литералы знают свою форму сами
        match &node.node_type {
            NodeType::Literal(Value::Tensor(arr)) => {
                node.shape = Some(arr.shape().to_vec());
                node.dtype = Some(DType::F32);
            }
            NodeType::Literal(Value::ScalarF32(_)) => {
                node.shape = Some(vec![]);
                node.dtype = Some(DType::F32);
            }
            _ => {}
        }

        self.nodes.insert(new_id, node);
        new_id
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) {
        self.outputs = outputs;
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> AsgResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(AsgError::NodeNotFound(id))
    }
}
