use parking_lot::RwLock;
use queue_worker_core::TaskCall;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A ready-to-run task built from one message.
pub type TaskFn = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// Turns a decoded call into a runnable task.
pub trait TaskParser {
    fn parse(&self, call: TaskCall) -> anyhow::Result<TaskFn>;
}

impl<F> TaskParser for F
where
    F: Fn(TaskCall) -> anyhow::Result<TaskFn>,
{
    fn parse(&self, call: TaskCall) -> anyhow::Result<TaskFn> {
        self(call)
    }
}

/// Registry of parsers by tool name
pub struct ParserRegistry {
    parsers: RwLock<HashMap<String, Arc<dyn TaskParser + Send + Sync>>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        ParserRegistry {
            parsers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry holding `echo`, `sleep` and `touch` (writing into `touch_dir`).
    pub fn with_builtins(touch_dir: impl Into<PathBuf>) -> Self {
        let registry = Self::new();
        registry.register("echo", EchoParser);
        registry.register("sleep", SleepParser::default());
        registry.register("touch", TouchParser::new(touch_dir));
        registry
    }

    pub fn register<P: TaskParser + Send + Sync + 'static>(&self, tool: impl Into<String>, parser: P) {
        self.parsers.write().insert(tool.into(), Arc::new(parser));
    }

    pub fn get(&self, tool: &str) -> Option<Arc<dyn TaskParser + Send + Sync>> {
        self.parsers.read().get(tool).cloned()
    }

    pub fn tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.parsers.read().keys().cloned().collect();
        tools.sort();
        tools
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs its arguments.
pub struct EchoParser;

impl TaskParser for EchoParser {
    fn parse(&self, call: TaskCall) -> anyhow::Result<TaskFn> {
        Ok(Box::new(move || {
            info!(args = ?call.args, kwargs = ?call.kwargs, "echo");
            Ok(())
        }))
    }
}

/// Sleeps for `seconds` (keyword) or the first positional argument.
#[derive(Default)]
pub struct SleepParser {
    fallback: Duration,
}

impl SleepParser {
    pub fn new(fallback: Duration) -> Self {
        SleepParser { fallback }
    }
}

impl TaskParser for SleepParser {
    fn parse(&self, call: TaskCall) -> anyhow::Result<TaskFn> {
        let seconds = call
            .kwargs
            .get("seconds")
            .and_then(|v| v.as_f64())
            .or_else(|| call.arg_f64(0));

        let duration = match seconds {
            Some(s) => Duration::try_from_secs_f64(s)
                .map_err(|e| anyhow::anyhow!("invalid sleep duration {}: {}", s, e))?,
            None => self.fallback,
        };

        Ok(Box::new(move || {
            std::thread::sleep(duration);
            Ok(())
        }))
    }
}

/// Creates `<dir>/<index>` where the index is the first positional argument.
pub struct TouchParser {
    dir: PathBuf,
}

impl TouchParser {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TouchParser { dir: dir.into() }
    }
}

impl TaskParser for TouchParser {
    fn parse(&self, call: TaskCall) -> anyhow::Result<TaskFn> {
        let index = call
            .arg_i64(0)
            .ok_or_else(|| anyhow::anyhow!("touch expects an integer index, got {:?}", call.args))?;
        let path = self.dir.join(index.to_string());

        Ok(Box::new(move || {
            std::fs::write(&path, index.to_string())
                .map_err(|e| anyhow::anyhow!("failed to write {}: {}", path.display(), e))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_closure_parser() {
        let parser = |call: TaskCall| -> anyhow::Result<TaskFn> {
            let n = call.arg_i64(0).unwrap_or_default();
            Ok(Box::new(move || {
                anyhow::ensure!(n > 0, "non-positive");
                Ok(())
            }))
        };

        assert!(parser.parse(TaskCall::positional(vec![json!(1)])).unwrap()().is_ok());
        assert!(parser.parse(TaskCall::positional(vec![json!(-1)])).unwrap()().is_err());
    }

    #[test]
    fn test_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ParserRegistry::with_builtins(dir.path());

        assert_eq!(registry.tools(), vec!["echo", "sleep", "touch"]);
        assert!(registry.get("unknown").is_none());

        let echo = registry.get("echo").unwrap();
        echo.parse(TaskCall::new(vec![json!("a1")], Default::default())).unwrap()().unwrap();
    }

    #[test]
    fn test_touch_writes_indexed_file() {
        let dir = tempfile::tempdir().unwrap();
        let task = TouchParser::new(dir.path())
            .parse(TaskCall::positional(vec![json!(7)]))
            .unwrap();
        assert!(!dir.path().join("7").exists());
        task().unwrap();
        assert!(dir.path().join("7").exists());
    }

    #[test]
    fn test_touch_rejects_missing_index() {
        let parser = TouchParser::new(".");
        assert!(parser.parse(TaskCall::positional(vec![json!("x")])).is_err());
    }

    #[test]
    fn test_sleep_duration_sources() {
        let start = std::time::Instant::now();
        SleepParser::default()
            .parse(TaskCall::new(vec![], Default::default()).with_kwarg("seconds", json!(0.02)))
            .unwrap()()
        .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));

        assert!(SleepParser::default()
            .parse(TaskCall::positional(vec![json!(-1.0)]))
            .is_err());
    }
}
