use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

/// Origin stream of one output chunk. The engine reports progress on
/// stderr and descriptions on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub channel: OutputChannel,
    pub text: String,
}

/// A running engine process. Chunks arrive as the process writes them;
/// the runner forwards text verbatim and never interprets it. Dropping
/// the receiver detaches both streams, after which the reaper thread
/// waits out the child.
pub struct EngineProcess {
    receiver: Receiver<OutputChunk>,
}

impl EngineProcess {
    pub fn spawn(executable: &Path, args: &[OsString], working_dir: &Path) -> Result<Self> {
        let mut child = Command::new(executable)
            .args(args)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn engine process {}", executable.display()))?;

        let (sender, receiver) = unbounded();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_thread = spawn_reader(stdout, OutputChannel::Stdout, sender.clone());
        let stderr_thread = spawn_reader(stderr, OutputChannel::Stderr, sender);

        thread::spawn(move || {
            if let Some(handle) = stdout_thread {
                let _ = handle.join();
            }
            if let Some(handle) = stderr_thread {
                let _ = handle.join();
            }
            let _ = child.wait();
        });

        Ok(Self { receiver })
    }

    #[must_use]
    pub fn output(&self) -> &Receiver<OutputChunk> {
        &self.receiver
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Option<R>,
    channel: OutputChannel,
    sender: Sender<OutputChunk>,
) -> Option<thread::JoinHandle<()>> {
    let stream = stream?;
    Some(thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(text) = line else { break };
            if text.trim().is_empty() {
                continue;
            }
            if sender.send(OutputChunk { channel, text }).is_err() {
                break;
            }
        }
    }))
}
