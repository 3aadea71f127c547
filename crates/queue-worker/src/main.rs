//! tq-worker command line

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use queue_worker::queue_worker_broker::{insert_tasks, MemoryBroker, MessageCounter};
use queue_worker::queue_worker_core::KwArgs;
use queue_worker::{logging, poll, ParserRegistry, WorkerConfig};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tq-worker")]
#[command(about = "Queue worker with a single connection-owning fetch thread", long_about = None)]
struct Cli {
    /// Path to a configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "TQ_CONFIG")]
    config: Option<String>,

    /// Log every received payload and enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Queue URL (overrides the configuration file)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Tool name; the queue is named after it
    #[arg(long, global = true)]
    tool: Option<String>,

    /// Parent queue name
    #[arg(long, global = true)]
    queue: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the number of messages in the queue (ready plus unacknowledged)
    Count,

    /// Seed an in-memory queue with tasks and work through it
    Demo {
        /// Number of tasks to insert
        #[arg(short = 'n', long, default_value = "10")]
        tasks: i64,

        /// Built-in task to run
        #[arg(long = "task", value_enum, default_value = "echo")]
        task: DemoTask,

        /// Directory for `touch` output files
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Duration of each `sleep` task in seconds
        #[arg(long, default_value = "1.0")]
        seconds: f64,

        /// Empty observations tolerated before stopping; negative polls forever
        #[arg(long, allow_negative_numbers = true)]
        max_num_retries: Option<i64>,

        /// Fetch thread idle interval in seconds
        #[arg(long)]
        sleep_interval: Option<f64>,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DemoTask {
    Echo,
    Sleep,
    Touch,
}

impl DemoTask {
    fn name(self) -> &'static str {
        match self {
            DemoTask::Echo => "echo",
            DemoTask::Sleep => "sleep",
            DemoTask::Touch => "touch",
        }
    }

    fn call(self, index: i64, seconds: f64) -> (Vec<Value>, KwArgs) {
        let mut kwargs = KwArgs::new();
        match self {
            DemoTask::Echo => {
                kwargs.insert("index".to_string(), json!(index));
            }
            DemoTask::Sleep => {
                kwargs.insert("seconds".to_string(), json!(seconds));
            }
            DemoTask::Touch => {}
        }
        (vec![json!(index)], kwargs)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = WorkerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(url) = cli.url {
        config.queue.url = url;
    }
    if let Some(tool) = cli.tool {
        config.queue.tool = tool;
    }
    if cli.queue.is_some() {
        config.queue.name = cli.queue;
    }
    if cli.verbose {
        config.poll.verbose = true;
    }

    let _guard = logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Command::Count => {
            let spec = config.queue.spec();
            let api = config.queue.management_api()?;
            let count = api
                .message_count(&spec.name)
                .with_context(|| format!("failed to query size of {}", spec.name))?;
            println!("{}", count);
        }

        Command::Demo {
            tasks,
            task,
            dir,
            seconds,
            max_num_retries,
            sleep_interval,
        } => {
            if let Some(max) = max_num_retries {
                config.poll.max_num_retries = u32::try_from(max).ok();
            }
            if let Some(secs) = sleep_interval {
                config.fetch.sleep_interval = Duration::try_from_secs_f64(secs)?;
            }

            let queue = config.queue.spec().name;
            let broker = MemoryBroker::new();
            let (args, kwargs): (Vec<_>, Vec<_>) = (0..tasks).map(|i| task.call(i, seconds)).unzip();
            let inserted = insert_tasks(&broker, &queue, args, kwargs)?;
            info!(queue = %queue, inserted, task = task.name(), "demo queue seeded");

            let registry = ParserRegistry::with_builtins(dir);
            let parser = registry
                .get(task.name())
                .with_context(|| format!("no parser registered for {}", task.name()))?;

            let summary = poll(
                Arc::new(broker.clone()),
                broker.clone(),
                &queue,
                &*parser,
                config.poll,
                config.fetch,
            )?;

            println!(
                "executed {} task(s), {} left in queue{}",
                summary.executed,
                broker.message_count(&queue)?,
                if summary.stopped_early { " (stopped early)" } else { "" }
            );
        }

        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}
