//! Fakes shared by the orchestrator and API tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kiln::cloud::{
    DirectoryError, DirectoryService, ImageSummary, LaunchError, ProcessOutcome,
    ProcessSupervisor,
};
use kiln::store::{MemoryStore, RequestStore};
use kiln::{
    BuildSubmission, CredentialError, CredentialSource, NetworkContext, NewBuildRequest,
    OciCredentials, Orchestrator, PackerSettings,
};

// ── Credentials ──

pub struct StaticCredentials(HashMap<String, OciCredentials>);

impl StaticCredentials {
    pub fn with_profiles(profiles: &[&str]) -> Self {
        Self(
            profiles
                .iter()
                .map(|name| {
                    (
                        (*name).to_owned(),
                        OciCredentials {
                            tenancy: "ocid1.tenancy.oc1..test".to_owned(),
                            user: format!("ocid1.user.oc1..{}", name.to_lowercase()),
                            key_file: PathBuf::from("/keys/test.pem"),
                            fingerprint: "aa:bb:cc".to_owned(),
                            region: None,
                        },
                    )
                })
                .collect(),
        )
    }
}

impl CredentialSource for StaticCredentials {
    fn resolve(&self, profile: &str) -> Result<OciCredentials, CredentialError> {
        self.0
            .get(profile)
            .cloned()
            .ok_or_else(|| CredentialError::UnknownProfile(profile.to_owned()))
    }
}

// ── Supervisor ──

/// What the supervisor saw when it was asked to run packer.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Contents of the template file at launch time
    pub template: Option<String>,
}

pub enum Script {
    Exit { code: Option<i32>, lines: Vec<String> },
    LaunchFailure,
    WaitFailure { lines: Vec<String> },
}

/// Plays back a fixed result and records every invocation.
pub struct ScriptedSupervisor {
    script: Script,
    delay: Duration,
    invocations: Mutex<Vec<Invocation>>,
    streamed: Mutex<Vec<String>>,
}

impl ScriptedSupervisor {
    pub fn exit(code: i32, lines: &[&str]) -> Self {
        Self::new(Script::Exit {
            code: Some(code),
            lines: lines.iter().map(|l| (*l).to_owned()).collect(),
        })
    }

    pub fn killed() -> Self {
        Self::new(Script::Exit {
            code: None,
            lines: vec!["==> terminated".to_owned()],
        })
    }

    pub fn launch_failure() -> Self {
        Self::new(Script::LaunchFailure)
    }

    /// Streams `lines`, then loses track of the process.
    pub fn wait_failure(lines: &[&str]) -> Self {
        Self::new(Script::WaitFailure {
            lines: lines.iter().map(|l| (*l).to_owned()).collect(),
        })
    }

    fn new(script: Script) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            invocations: Mutex::new(Vec::new()),
            streamed: Mutex::new(Vec::new()),
        }
    }

    /// Hold the process open for `delay` before exiting.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn streamed(&self) -> Vec<String> {
        self.streamed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessSupervisor for ScriptedSupervisor {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        sink: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<ProcessOutcome, LaunchError> {
        let template = args.last().and_then(|p| std::fs::read_to_string(p).ok());
        self.invocations.lock().unwrap().push(Invocation {
            program: program.to_owned(),
            args: args.to_vec(),
            template,
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.script {
            Script::Exit { code, lines } => Ok(ProcessOutcome {
                exit_code: *code,
                output: self.stream(lines, sink),
            }),
            Script::LaunchFailure => Err(LaunchError::Spawn {
                program: program.to_owned(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            }),
            Script::WaitFailure { lines } => Err(LaunchError::Wait {
                program: program.to_owned(),
                output: self.stream(lines, sink),
                source: std::io::Error::other("wait interrupted"),
            }),
        }
    }
}

impl ScriptedSupervisor {
    fn stream(&self, lines: &[String], sink: &(dyn Fn(&str) + Send + Sync)) -> String {
        let mut output = String::new();
        for line in lines {
            sink(line.as_str());
            self.streamed.lock().unwrap().push(line.clone());
            output.push_str(line);
            output.push('\n');
        }
        output
    }
}

// ── Directory ──

pub struct StaticDirectory {
    pub available: bool,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl StaticDirectory {
    pub fn available() -> Self {
        Self {
            available: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn check(&self) -> Result<(), DirectoryError> {
        if self.available {
            Ok(())
        } else {
            Err(DirectoryError::Profiles {
                source: CredentialError::UnknownProfile("DEFAULT".to_owned()),
            })
        }
    }
}

#[async_trait]
impl DirectoryService for StaticDirectory {
    async fn list_profiles(&self) -> Result<Vec<String>, DirectoryError> {
        self.check()?;
        Ok(vec!["DEFAULT".to_owned(), "BUILDER".to_owned()])
    }

    async fn list_images(
        &self,
        compartment_id: &str,
        profile: &str,
    ) -> Result<Vec<ImageSummary>, DirectoryError> {
        self.calls
            .lock()
            .unwrap()
            .push((compartment_id.to_owned(), profile.to_owned()));
        self.check()?;
        Ok(vec![
            ImageSummary {
                id: "ocid1.image.oc1..ol8".to_owned(),
                display_name: "Oracle-Linux-8".to_owned(),
            },
            ImageSummary {
                id: "ocid1.image.oc1..ol9".to_owned(),
                display_name: "Oracle-Linux-9".to_owned(),
            },
        ])
    }

    async fn list_shapes(
        &self,
        compartment_id: &str,
        profile: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        self.calls
            .lock()
            .unwrap()
            .push((compartment_id.to_owned(), profile.to_owned()));
        self.check()?;
        Ok(vec![
            "VM.Standard.E4.Flex".to_owned(),
            "VM.Standard2.1".to_owned(),
        ])
    }
}

// ── Fixtures ──

pub fn network() -> NetworkContext {
    NetworkContext {
        availability_domain: "Uocm:PHX-AD-1".to_owned(),
        compartment_ocid: "ocid1.compartment.oc1..test".to_owned(),
        subnet_ocid: "ocid1.subnet.oc1..test".to_owned(),
    }
}

pub fn fixed_request(profile: &str) -> NewBuildRequest {
    NewBuildRequest {
        profile: profile.to_owned(),
        base_image: "ocid1.image.oc1..base".to_owned(),
        packages: "nginx\ngit".to_owned(),
        shape: "VM.Standard2.1".to_owned(),
        ..NewBuildRequest::default()
    }
}

pub fn flex_request(profile: &str) -> NewBuildRequest {
    NewBuildRequest {
        shape: "VM.Standard.E4.Flex".to_owned(),
        ocpus: Some(2),
        memory_in_gbs: Some(32),
        ..fixed_request(profile)
    }
}

pub fn submission(request: NewBuildRequest) -> BuildSubmission {
    request.validate().unwrap()
}

/// An orchestrator over a fresh memory store, writing templates to `work_dir`.
pub fn orchestrator(
    supervisor: Arc<ScriptedSupervisor>,
    work_dir: &Path,
) -> (Arc<Orchestrator>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        Arc::clone(&store) as Arc<dyn RequestStore>,
        Arc::new(StaticCredentials::with_profiles(&["DEFAULT", "BUILDER"])),
        supervisor,
        network(),
    )
    .packer_settings(PackerSettings {
        binary: "packer".to_owned(),
        work_dir: work_dir.to_path_buf(),
    });
    (Arc::new(orchestrator), store)
}

/// Template files currently present in `dir`.
pub fn templates_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.to_string_lossy().ends_with(".pkr.json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}
