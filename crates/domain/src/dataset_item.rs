//! 分析结果文件中的单个条目
//!
//! 远程服务对同一字段可能给出标量或数组，数值字段可能为 null、NaN 或字符串，
//! 这里在反序列化时统一归一化，下游只面对一种形状。

use serde::{Deserialize, Deserializer, Serialize};

/// 结果数据集中的一个条目
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetItem {
    /// 条目对应的图像路径，单文件结果只有一个
    #[serde(deserialize_with = "one_or_many_strings")]
    pub id: Vec<String>,
    pub name: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub features: Option<String>,
    #[serde(deserialize_with = "lenient_vector")]
    pub projection: Option<Vec<f64>>,
    #[serde(deserialize_with = "lenient_index")]
    pub clust_id: Option<i64>,
    #[serde(deserialize_with = "lenient_score")]
    pub clust_prob: Option<f64>,
    #[serde(deserialize_with = "lenient_score")]
    pub outlier_score: Option<f64>,
    #[serde(deserialize_with = "lenient_flag")]
    pub is_outlier: Option<bool>,
    pub neighbors: Option<Vec<i64>>,
    #[serde(deserialize_with = "one_or_many_scores")]
    pub neighbor_scores: Vec<f64>,
    #[serde(deserialize_with = "one_or_many_strings")]
    pub label: Vec<String>,
    #[serde(deserialize_with = "one_or_many_strings")]
    pub label_pred: Vec<String>,
    #[serde(deserialize_with = "one_or_many_scores")]
    pub prob_pred: Vec<f64>,
}

impl DatasetItem {
    /// 条目的主路径
    pub fn path(&self) -> Option<&str> {
        self.id.first().map(String::as_str)
    }

    /// 按下标对齐的 (标签, 概率) 对，缺失的概率视为 0
    pub fn predictions(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.label_pred.iter().enumerate().map(|(i, label)| {
            let prob = self.prob_pred.get(i).copied();
            (label.as_str(), normalize_score(prob))
        })
    }
}

/// 非有限或缺失的分数存为 0
pub fn normalize_score(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseString {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl From<LooseString> for String {
    fn from(value: LooseString) -> Self {
        match value {
            LooseString::Text(s) => s,
            LooseString::Integer(i) => i.to_string(),
            LooseString::Float(f) => f.to_string(),
            LooseString::Flag(b) => b.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    fn into_f64(self) -> f64 {
        match self {
            LooseNumber::Number(n) => n,
            LooseNumber::Text(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        }
    }
}

/// 数组中的 null 保留为 NaN，以维持与标签数组的下标对齐
#[derive(Deserialize)]
#[serde(transparent)]
struct LooseScore(Option<LooseNumber>);

impl LooseScore {
    fn into_f64(self) -> f64 {
        self.0.map(LooseNumber::into_f64).unwrap_or(f64::NAN)
    }
}

fn one_or_many_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<OneOrMany<LooseString>> = Option::deserialize(deserializer)?;
    Ok(value
        .map(OneOrMany::into_vec)
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect())
}

fn one_or_many_scores<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<OneOrMany<LooseScore>> = Option::deserialize(deserializer)?;
    Ok(value
        .map(OneOrMany::into_vec)
        .unwrap_or_default()
        .into_iter()
        .map(LooseScore::into_f64)
        .collect())
}

fn lenient_vector<'de, D>(deserializer: D) -> Result<Option<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Vec<LooseScore>> = Option::deserialize(deserializer)?;
    Ok(value.map(|values| values.into_iter().map(LooseScore::into_f64).collect()))
}

fn lenient_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<LooseNumber> = Option::deserialize(deserializer)?;
    Ok(value.map(LooseNumber::into_f64))
}

fn lenient_index<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<LooseNumber> = Option::deserialize(deserializer)?;
    Ok(value
        .map(LooseNumber::into_f64)
        .filter(|v| v.is_finite())
        .map(|v| v as i64))
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LooseFlag {
        Flag(bool),
        Number(f64),
        Text(String),
    }

    let value: Option<LooseFlag> = Option::deserialize(deserializer)?;
    Ok(value.map(|flag| match flag {
        LooseFlag::Flag(b) => b,
        LooseFlag::Number(n) => n != 0.0 && n.is_finite(),
        LooseFlag::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1"),
    }))
}
