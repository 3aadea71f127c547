use crate::{QueueError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keyword arguments of a queued call.
pub type KwArgs = Map<String, Value>;

/// Wire format of one queued unit of work.
///
/// Serialized as a JSON object with exactly two fields, `args` (positional
/// values) and `kwargs` (keyword name to value).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskCall {
    pub args: Vec<Value>,
    pub kwargs: KwArgs,
}

impl TaskCall {
    pub fn new(args: Vec<Value>, kwargs: KwArgs) -> Self {
        TaskCall { args, kwargs }
    }

    /// Build a call with positional arguments only.
    pub fn positional<I, V>(args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        TaskCall {
            args: args.into_iter().map(Into::into).collect(),
            kwargs: KwArgs::new(),
        }
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Encode parallel lists of positional and keyword arguments.
    ///
    /// Both lists must have the same length; entry `i` of each forms one call.
    pub fn encode_batch(task_args: Vec<Vec<Value>>, task_kwargs: Vec<KwArgs>) -> Result<Vec<String>> {
        if task_args.len() != task_kwargs.len() {
            return Err(QueueError::MismatchedArguments {
                args: task_args.len(),
                kwargs: task_kwargs.len(),
            });
        }

        task_args
            .into_iter()
            .zip(task_kwargs)
            .map(|(args, kwargs)| TaskCall::new(args, kwargs).encode())
            .collect()
    }

    /// Positional argument `index` as an integer, if present and integral.
    pub fn arg_i64(&self, index: usize) -> Option<i64> {
        self.args.get(index).and_then(Value::as_i64)
    }

    /// Positional argument `index` as a float, accepting integers too.
    pub fn arg_f64(&self, index: usize) -> Option<f64> {
        self.args.get(index).and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_args_and_kwargs() {
        let call = TaskCall::positional(["a1"]).with_kwarg("b1", 1);
        let decoded = TaskCall::decode(&call.encode().unwrap()).unwrap();

        assert_eq!(decoded.args, vec![json!("a1")]);
        assert_eq!(decoded.kwargs.get("b1"), Some(&json!(1)));
        assert_eq!(decoded, call);
    }

    #[test]
    fn test_encoded_shape() {
        let call = TaskCall::positional([3]);
        let value: Value = serde_json::from_str(&call.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"args": [3], "kwargs": {}}));
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        assert!(TaskCall::decode(r#"{"args": []}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_extra_field() {
        let err = TaskCall::decode(r#"{"args": [], "kwargs": {}, "retries": 3}"#);
        assert!(matches!(err, Err(QueueError::Serialization(_))));
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(TaskCall::decode("task").is_err());
    }

    #[test]
    fn test_encode_batch() {
        let payloads = TaskCall::encode_batch(
            vec![vec![json!("a1")], vec![json!("a2")]],
            vec![KwArgs::new(), KwArgs::new()],
        )
        .unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(TaskCall::decode(&payloads[1]).unwrap().args, vec![json!("a2")]);
    }

    #[test]
    fn test_encode_batch_mismatch() {
        let err = TaskCall::encode_batch(vec![vec![], vec![]], vec![KwArgs::new()]).unwrap_err();
        assert!(matches!(err, QueueError::MismatchedArguments { args: 2, kwargs: 1 }));
    }

    #[test]
    fn test_arg_accessors() {
        let call = TaskCall::positional([json!(4), json!(0.5), json!("x")]);
        assert_eq!(call.arg_i64(0), Some(4));
        assert_eq!(call.arg_f64(0), Some(4.0));
        assert_eq!(call.arg_f64(1), Some(0.5));
        assert_eq!(call.arg_i64(2), None);
        assert_eq!(call.arg_i64(9), None);
    }
}
