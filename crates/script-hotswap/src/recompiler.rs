//! Asynchronous build pipeline: recompiles and installs changed script
//! modules through the external build driver, one job at a time.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use tracing::{error, info, trace};

use crate::config::HotSwapConfig;
use crate::source::SourceEvents;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildPhase {
    Compile,
    Install,
}

/// Result record sent back by the build worker thread.
#[derive(Debug)]
pub(crate) struct BuildOutcome {
    phase: BuildPhase,
    module: String,
    project: String,
    directive: String,
    success: bool,
}

struct BuildJob {
    rx: Receiver<BuildOutcome>,
    worker: JoinHandle<()>,
}

/// Build-target project name of a script module.
pub(crate) fn project_name(module: &str) -> String {
    format!("scripts_{module}").to_lowercase()
}

pub(crate) fn compile_args(build_dir: &Path, project: &str, directive: &str) -> Vec<OsString> {
    vec![
        OsString::from("--build"),
        build_dir.into(),
        OsString::from("--target"),
        project.into(),
        OsString::from("--config"),
        directive.into(),
    ]
}

pub(crate) fn install_args(build_dir: &Path, project: &str, directive: &str) -> Vec<OsString> {
    vec![
        OsString::from(format!("-DBUILD_TYPE={directive}")),
        OsString::from(format!("-DCOMPONENT={project}")),
        OsString::from("-P"),
        build_dir.join("cmake_install.cmake").into(),
    ]
}

/// Run `command` with `args`, forwarding its stdout/stderr to the
/// host's streams. Both pipes are drained from dedicated threads so a
/// chatty build cannot deadlock on a full pipe.
pub(crate) fn run_streaming(command: &Path, args: &[OsString]) -> io::Result<ExitStatus> {
    trace!(
        target: "scripts.hotswap",
        ">> Invoking \"{}\" {:?}",
        command.display(),
        args
    );

    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let _ = io::copy(&mut pipe, &mut io::stdout());
        })
    });
    let stderr = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let _ = io::copy(&mut pipe, &mut io::stderr());
        })
    });

    let status = child.wait();
    if let Some(drain) = stdout {
        let _ = drain.join();
    }
    if let Some(drain) = stderr {
        let _ = drain.join();
    }
    status
}

/// The idle → compiling → installing state machine. At most one build
/// subprocess is alive at any time.
pub(crate) struct Recompiler {
    build_command: PathBuf,
    build_dir: PathBuf,
    install_enabled: bool,
    build_type: Option<String>,
    poll: Duration,
    quiescence: Duration,
    directives: HashMap<String, String>,
    job: Option<BuildJob>,
}

impl Recompiler {
    pub(crate) fn new(config: &HotSwapConfig) -> Self {
        Self {
            build_command: config.build_command.clone(),
            build_dir: config.build_dir.clone(),
            install_enabled: config.install_enabled,
            build_type: config.build_type.clone(),
            poll: config.build_poll(),
            quiescence: config.quiescence(),
            directives: HashMap::new(),
            job: None,
        }
    }

    /// Remember the build directive a module reported when it was
    /// loaded. Entries are kept after unload so a rebuild between
    /// unload and reload still resolves.
    pub(crate) fn record_directive(&mut self, module: &str, directive: String) {
        self.directives.insert(module.to_owned(), directive);
    }

    pub(crate) fn is_building(&self) -> bool {
        self.job.is_some()
    }

    /// Advance the state machine by one tick: poll the running job
    /// (bounded wait), dispatch its follow-up phase, and start the next
    /// compile when the changed-modules set is quiescent.
    pub(crate) fn update(&mut self, source: &SourceEvents) {
        if !self.poll_job() {
            // Build is in progress, wait for it to finish
            return;
        }

        // An install phase may have been chained by the finished job
        if self.job.is_some() {
            return;
        }

        // Avoid burst updates through waiting for a short time after changes
        if !source.quiet_for(self.quiescence) {
            return;
        }

        let Some(module) = source.pop_changed() else {
            return;
        };
        self.spawn_compile(module);
    }

    /// Poll the running job with a bounded wait. Returns false while it
    /// is still running.
    fn poll_job(&mut self) -> bool {
        let Some(job) = &self.job else {
            return true;
        };

        let received = job.rx.recv_timeout(self.poll);
        let outcome = match received {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => return false,
            Err(RecvTimeoutError::Disconnected) => {
                error!(target: "scripts.hotswap", "Build worker terminated without a result!");
                None
            }
        };

        if let Some(job) = self.job.take() {
            let _ = job.worker.join();
        }
        if let Some(outcome) = outcome {
            self.finish(outcome);
        }
        true
    }

    /// Block until the in-flight job (if any) terminates. Follow-up
    /// phases are not dispatched.
    pub(crate) fn wait(&mut self) {
        if let Some(job) = self.job.take() {
            let _ = job.rx.recv();
            let _ = job.worker.join();
        }
    }

    fn finish(&mut self, outcome: BuildOutcome) {
        if !outcome.success {
            error!(
                target: "scripts.hotswap",
                "Last build for module {} failed!",
                outcome.module
            );
            return;
        }

        match outcome.phase {
            BuildPhase::Compile => {
                if self.install_enabled {
                    info!(
                        target: "scripts.hotswap",
                        "Last build of {} job succeeded, continue with installing...",
                        outcome.module
                    );
                    self.spawn_install(outcome);
                } else {
                    // Skip the install step when it's disabled in the config.
                    info!(
                        target: "scripts.hotswap",
                        "Last build of {} job succeeded, finished.",
                        outcome.module
                    );
                }
            }
            BuildPhase::Install => {
                info!(target: "scripts.hotswap", "Installed module {}.", outcome.module);
            }
        }
    }

    fn spawn_compile(&mut self, module: String) {
        info!(target: "scripts.hotswap", "Recompiling Module \"{}\"...", module);

        let project = project_name(&module);

        let directive = self
            .build_type
            .clone()
            .or_else(|| self.directives.get(&module).cloned());
        let Some(directive) = directive else {
            debug_assert!(false, "no build directive recorded for module {module}");
            error!(
                target: "scripts.hotswap",
                "No build directive known for module \"{}\", skipping rebuild!",
                module
            );
            return;
        };

        let args = compile_args(&self.build_dir, &project, &directive);
        self.spawn(BuildPhase::Compile, module, project, directive, args);
    }

    fn spawn_install(&mut self, outcome: BuildOutcome) {
        let args = install_args(&self.build_dir, &outcome.project, &outcome.directive);
        self.spawn(
            BuildPhase::Install,
            outcome.module,
            outcome.project,
            outcome.directive,
            args,
        );
    }

    fn spawn(
        &mut self,
        phase: BuildPhase,
        module: String,
        project: String,
        directive: String,
        args: Vec<OsString>,
    ) {
        let (tx, rx) = bounded(1);
        let command = self.build_command.clone();

        let worker = thread::spawn(move || {
            match phase {
                BuildPhase::Compile => {
                    info!(target: "scripts.hotswap", ">> Started asynchronous build job...");
                }
                BuildPhase::Install => {
                    info!(target: "scripts.hotswap", ">> Started asynchronous install job...");
                }
            }

            let success = match run_streaming(&command, &args) {
                Ok(status) => status.success(),
                Err(e) => {
                    error!(
                        target: "scripts.hotswap",
                        "Failed to invoke the build driver \"{}\": {}",
                        command.display(),
                        e
                    );
                    false
                }
            };

            let _ = tx.send(BuildOutcome {
                phase,
                module,
                project,
                directive,
                success,
            });
        });

        self.job = Some(BuildJob { rx, worker });
    }
}
