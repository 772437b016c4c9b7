use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lcow::uvm::{
    GuestProcess, GuestSink, GuestSource, IoCounters, ProcessConfig, ProcessExecutor, ScsiAddress,
    ScsiController,
};
use lcow_shared::{LcowError, LcowResult};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

/// One interaction with the fake utility VM, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestCall {
    AddScsi { path: PathBuf },
    RemoveScsi { path: PathBuf, address: ScsiAddress },
    Process { args: Vec<String> },
    Kill { args: Vec<String> },
    Close { args: Vec<String> },
}

/// How a scripted guest process behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessScript {
    /// Write the given output, then exit with `code`.
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Fail to create the process.
    StartError(String),
    /// Never exit.
    Hang,
    /// Fail while waiting for exit.
    WaitError(String),
    /// Copy stdin to stdout, then exit 0.
    Relay,
}

impl ProcessScript {
    pub fn success() -> Self {
        Self::exit(0)
    }

    pub fn exit(code: i32) -> Self {
        Self::Exit {
            code,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self::Exit {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Scripted, call-recording stand-in for a utility VM.
///
/// Processes are matched first by their full command line, then by program
/// name. Unscripted `ls` prints `sdb`, unscripted `tar2vhd` relays stdin to
/// stdout, everything else exits 0.
#[derive(Debug)]
pub struct FakeUtilityVm {
    calls: Arc<Mutex<Vec<GuestCall>>>,
    scripts: Mutex<HashMap<String, ProcessScript>>,
    address: ScsiAddress,
    attach_error: Mutex<Option<String>>,
    detach_error: Mutex<Option<String>>,
}

impl Default for FakeUtilityVm {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeUtilityVm {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            scripts: Mutex::new(HashMap::new()),
            address: ScsiAddress::new(0, 1),
            attach_error: Mutex::new(None),
            detach_error: Mutex::new(None),
        }
    }

    /// Script processes whose command line or program name is `matcher`.
    pub fn script(self, matcher: impl Into<String>, script: ProcessScript) -> Self {
        self.scripts.lock().insert(matcher.into(), script);
        self
    }

    /// Address returned by successful hot-adds.
    pub fn with_address(mut self, address: ScsiAddress) -> Self {
        self.address = address;
        self
    }

    pub fn fail_attach(self, message: impl Into<String>) -> Self {
        *self.attach_error.lock() = Some(message.into());
        self
    }

    pub fn fail_detach(self, message: impl Into<String>) -> Self {
        *self.detach_error.lock() = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<GuestCall> {
        self.calls.lock().clone()
    }

    /// Program names of started processes, in order.
    pub fn programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                GuestCall::Process { args } => args.first().cloned(),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&GuestCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn remove_count(&self) -> usize {
        self.count(|call| matches!(call, GuestCall::RemoveScsi { .. }))
    }

    fn lookup(&self, args: &[String]) -> ProcessScript {
        let scripts = self.scripts.lock();
        if let Some(script) = scripts.get(&args.join(" ")) {
            return script.clone();
        }
        let program = args.first().map(String::as_str).unwrap_or_default();
        if let Some(script) = scripts.get(program) {
            return script.clone();
        }
        match program {
            "ls" => ProcessScript::stdout("sdb\n"),
            "tar2vhd" => ProcessScript::Relay,
            _ => ProcessScript::success(),
        }
    }

    fn record(&self, call: GuestCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ProcessExecutor for FakeUtilityVm {
    async fn create_process(&self, config: ProcessConfig) -> LcowResult<Box<dyn GuestProcess>> {
        let ProcessConfig {
            args,
            stdin,
            stdout,
            stderr,
            ..
        } = config;
        self.record(GuestCall::Process { args: args.clone() });

        let script = self.lookup(&args);
        if let ProcessScript::StartError(message) = &script {
            return Err(LcowError::Execution(message.clone()));
        }

        Ok(Box::new(FakeProcess {
            args,
            script,
            stdin,
            stdout,
            stderr,
            counters: IoCounters::new(),
            exit_code: None,
            calls: Arc::clone(&self.calls),
        }))
    }
}

#[async_trait]
impl ScsiController for FakeUtilityVm {
    async fn add_scsi(
        &self,
        host_path: &Path,
        _controller_hint: Option<u8>,
    ) -> LcowResult<ScsiAddress> {
        self.record(GuestCall::AddScsi {
            path: host_path.to_path_buf(),
        });
        let error = self.attach_error.lock().clone();
        match error {
            Some(message) => Err(LcowError::Storage(message)),
            None => Ok(self.address),
        }
    }

    async fn remove_scsi(&self, host_path: &Path, address: ScsiAddress) -> LcowResult<()> {
        self.record(GuestCall::RemoveScsi {
            path: host_path.to_path_buf(),
            address,
        });
        let error = self.detach_error.lock().clone();
        match error {
            Some(message) => Err(LcowError::Storage(message)),
            None => Ok(()),
        }
    }
}

struct FakeProcess {
    args: Vec<String>,
    script: ProcessScript,
    stdin: Option<GuestSource>,
    stdout: Option<GuestSink>,
    stderr: Option<GuestSink>,
    counters: IoCounters,
    exit_code: Option<i32>,
    calls: Arc<Mutex<Vec<GuestCall>>>,
}

impl FakeProcess {
    async fn emit(sink: &mut Option<GuestSink>, bytes: &[u8]) -> LcowResult<u64> {
        let Some(sink) = sink.as_mut() else {
            return Ok(0);
        };
        sink.write_all(bytes).await?;
        sink.shutdown().await?;
        Ok(bytes.len() as u64)
    }
}

#[async_trait]
impl GuestProcess for FakeProcess {
    async fn wait(&mut self) -> LcowResult<()> {
        match self.script.clone() {
            ProcessScript::Exit {
                code,
                stdout,
                stderr,
            } => {
                let written = Self::emit(&mut self.stdout, stdout.as_bytes()).await?;
                self.counters.add_stdout(written);
                let written = Self::emit(&mut self.stderr, stderr.as_bytes()).await?;
                self.counters.add_stderr(written);
                self.exit_code = Some(code);
                Ok(())
            }
            ProcessScript::Relay => {
                if let (Some(stdin), Some(stdout)) = (self.stdin.as_mut(), self.stdout.as_mut()) {
                    let copied = tokio::io::copy(stdin, stdout).await?;
                    stdout.shutdown().await?;
                    self.counters.add_stdin(copied);
                    self.counters.add_stdout(copied);
                }
                self.exit_code = Some(0);
                Ok(())
            }
            ProcessScript::Hang => std::future::pending().await,
            ProcessScript::WaitError(message) => Err(LcowError::Execution(message)),
            ProcessScript::StartError(message) => Err(LcowError::Execution(message)),
        }
    }

    fn exit_code(&self) -> LcowResult<i32> {
        self.exit_code
            .ok_or_else(|| LcowError::Execution("process has not exited".to_string()))
    }

    async fn kill(&mut self) -> LcowResult<()> {
        self.calls.lock().push(GuestCall::Kill {
            args: self.args.clone(),
        });
        Ok(())
    }

    async fn close(self: Box<Self>) -> LcowResult<()> {
        self.calls.lock().push(GuestCall::Close {
            args: self.args.clone(),
        });
        Ok(())
    }

    fn io_counters(&self) -> IoCounters {
        self.counters.clone()
    }
}
