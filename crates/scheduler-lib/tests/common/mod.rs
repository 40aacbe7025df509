//! In-memory fakes for the scheduler gateways
#![allow(dead_code)]

use scheduler_lib::batch::BatchScheduler;
use scheduler_lib::control_plane::{async_trait, ControlPlane, PodWatch};
use scheduler_lib::{
    BatchError, ContainerRequests, ControlPlaneError, EventRecorder, FitConfig, FitResolver,
    HealthRegistry, JobRecord, JobState, PodRef, ResourceFootprint, SchedulingCoordinator,
    SchedulingEvent, JOB_ID_ANNOTATION,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn pod(name: &str, cpu: &str, memory: &str) -> PodRef {
    PodRef {
        name: name.to_string(),
        namespace: "default".to_string(),
        uid: format!("uid-{}", name),
        created_at: None,
        containers: vec![ContainerRequests {
            name: "main".to_string(),
            requests: BTreeMap::from([
                ("cpu".to_string(), cpu.to_string()),
                ("memory".to_string(), memory.to_string()),
            ]),
        }],
        annotations: BTreeMap::new(),
        terminating: false,
    }
}

pub fn with_job_id(mut pod: PodRef, job_id: &str) -> PodRef {
    pod.annotations
        .insert(JOB_ID_ANNOTATION.to_string(), job_id.to_string());
    pod
}

/// Scripted watch stream
pub enum FakeStream {
    /// Opening the watch fails
    OpenFails(String),
    /// Yields the pods, then the server closes the stream
    Pods(Vec<PodRef>),
    /// Yields the pods, then the stream breaks
    PodsThenError(Vec<PodRef>, String),
}

#[derive(Default)]
pub struct FakeControlPlane {
    pub pods: Mutex<Vec<PodRef>>,
    pub patches: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    pub bindings: Mutex<Vec<(String, String)>>,
    pub events: Mutex<Vec<SchedulingEvent>>,
    pub streams: Mutex<VecDeque<FakeStream>>,
    pub watch_opens: AtomicUsize,
    pub fail_list: AtomicBool,
    pub fail_patch: AtomicBool,
    pub fail_bind: AtomicBool,
}

impl FakeControlPlane {
    pub fn with_pods(pods: Vec<PodRef>) -> Self {
        Self {
            pods: Mutex::new(pods),
            ..Default::default()
        }
    }

    pub fn with_streams(streams: Vec<FakeStream>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            ..Default::default()
        }
    }

    pub fn bindings(&self) -> Vec<(String, String)> {
        self.bindings.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<SchedulingEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn patches(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.patches.lock().unwrap().clone()
    }

    /// Current state of a stored pod
    pub fn stored(&self, name: &str) -> Option<PodRef> {
        self.pods
            .lock()
            .unwrap()
            .iter()
            .find(|pod| pod.name == name)
            .cloned()
    }
}

fn rejected(operation: &'static str) -> ControlPlaneError {
    ControlPlaneError::Status {
        operation,
        status: 500,
        body: "injected failure".to_string(),
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_unscheduled(&self) -> Result<Vec<PodRef>, ControlPlaneError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(rejected("list pods"));
        }
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn watch_unscheduled(&self) -> Result<Box<dyn PodWatch>, ControlPlaneError> {
        self.watch_opens.fetch_add(1, Ordering::SeqCst);
        let next = self.streams.lock().unwrap().pop_front();
        match next {
            Some(FakeStream::OpenFails(message)) => Err(ControlPlaneError::WatchError(message)),
            Some(FakeStream::Pods(pods)) => Ok(Box::new(FakeWatch {
                items: pods.into_iter().map(Ok).collect(),
                hang: false,
            })),
            Some(FakeStream::PodsThenError(pods, message)) => {
                let mut items: VecDeque<_> = pods.into_iter().map(Ok).collect();
                items.push_back(Err(message));
                Ok(Box::new(FakeWatch { items, hang: false }))
            }
            None => Ok(Box::new(FakeWatch {
                items: VecDeque::new(),
                hang: true,
            })),
        }
    }

    async fn patch_annotations(
        &self,
        pod: &PodRef,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControlPlaneError> {
        if self.fail_patch.load(Ordering::SeqCst) {
            return Err(rejected("patch pod"));
        }
        self.patches
            .lock()
            .unwrap()
            .push((pod.name.clone(), annotations.clone()));
        if let Some(stored) = self
            .pods
            .lock()
            .unwrap()
            .iter_mut()
            .find(|stored| stored.name == pod.name)
        {
            stored.annotations.extend(annotations.clone());
        }
        Ok(())
    }

    async fn bind(&self, pod: &PodRef, node: &str) -> Result<(), ControlPlaneError> {
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(rejected("bind pod"));
        }
        self.bindings
            .lock()
            .unwrap()
            .push((pod.name.clone(), node.to_string()));
        self.pods.lock().unwrap().retain(|stored| stored.name != pod.name);
        Ok(())
    }

    async fn post_event(&self, event: &SchedulingEvent) -> Result<(), ControlPlaneError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct FakeWatch {
    items: VecDeque<Result<PodRef, String>>,
    /// Stay open without delivering anything once the items run out
    hang: bool,
}

#[async_trait]
impl PodWatch for FakeWatch {
    async fn next_added(&mut self) -> Result<Option<PodRef>, ControlPlaneError> {
        match self.items.pop_front() {
            Some(Ok(pod)) => Ok(Some(pod)),
            Some(Err(message)) => Err(ControlPlaneError::WatchError(message)),
            None if self.hang => std::future::pending().await,
            None => Ok(None),
        }
    }
}

/// Scripted answer to a status query
#[derive(Debug, Clone)]
pub enum FakeStatus {
    Queued,
    Placed(String),
    Finished(Option<String>),
    Unknown,
    /// Finished and dropped from the server without history
    Gone,
    Error,
}

pub struct FakeBatch {
    pub submits: Mutex<Vec<(String, ResourceFootprint)>>,
    pub status_queries: Mutex<Vec<String>>,
    script: Mutex<VecDeque<FakeStatus>>,
    fallback: FakeStatus,
    pub status_delay: Duration,
    pub fail_submit: AtomicBool,
    next_job: AtomicUsize,
}

impl FakeBatch {
    /// Answers `script` in order, then `fallback` forever
    pub fn scripted(script: Vec<FakeStatus>, fallback: FakeStatus) -> Self {
        Self {
            submits: Mutex::new(Vec::new()),
            status_queries: Mutex::new(Vec::new()),
            script: Mutex::new(script.into()),
            fallback,
            status_delay: Duration::ZERO,
            fail_submit: AtomicBool::new(false),
            next_job: AtomicUsize::new(1),
        }
    }

    pub fn always(status: FakeStatus) -> Self {
        Self::scripted(vec![], status)
    }

    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub fn submits(&self) -> Vec<(String, ResourceFootprint)> {
        self.submits.lock().unwrap().clone()
    }

    pub fn status_queries(&self) -> Vec<String> {
        self.status_queries.lock().unwrap().clone()
    }
}

fn record(job_id: &str, state: &str, substate: &str, exec_host: Option<String>, comment: Option<String>) -> JobRecord {
    JobRecord {
        job_id: job_id.to_string(),
        state: JobState::from_code(Some(state)),
        state_code: Some(state.to_string()),
        substate: Some(substate.to_string()),
        exec_host,
        comment,
    }
}

#[async_trait]
impl BatchScheduler for FakeBatch {
    async fn submit(&self, name: &str, footprint: &ResourceFootprint) -> Result<String, BatchError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(BatchError::NonZeroExit {
                command: "qsub".to_string(),
                code: Some(1),
                stderr: "qsub: Job rejected by all possible destinations".to_string(),
            });
        }
        self.submits
            .lock()
            .unwrap()
            .push((name.to_string(), *footprint));
        let n = self.next_job.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}.pbs", n))
    }

    async fn status(&self, job_id: &str) -> Result<JobRecord, BatchError> {
        self.status_queries.lock().unwrap().push(job_id.to_string());
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match next {
            FakeStatus::Queued => Ok(record(
                job_id,
                "Q",
                "10",
                None,
                Some("Not Running: Insufficient amount of resource: ncpus".to_string()),
            )),
            FakeStatus::Placed(exec_host) => Ok(record(job_id, "R", "42", Some(exec_host), None)),
            FakeStatus::Finished(comment) => Ok(record(job_id, "F", "92", None, comment)),
            FakeStatus::Unknown => Err(BatchError::UnknownJob(job_id.to_string())),
            FakeStatus::Gone => Err(BatchError::FinishedJob(job_id.to_string())),
            FakeStatus::Error => Err(BatchError::Timeout {
                command: "qstat".to_string(),
                timeout: Duration::from_secs(30),
            }),
        }
    }
}

/// Coordinator wired to the fakes
pub struct Harness {
    pub control_plane: Arc<FakeControlPlane>,
    pub batch: Arc<FakeBatch>,
    pub resolver: Arc<FitResolver>,
    pub coordinator: Arc<SchedulingCoordinator>,
    pub health: HealthRegistry,
}

pub fn harness(control_plane: FakeControlPlane, batch: FakeBatch) -> Harness {
    harness_with(control_plane, batch, 4)
}

pub fn harness_with(control_plane: FakeControlPlane, batch: FakeBatch, max_concurrent_pods: usize) -> Harness {
    let control_plane = Arc::new(control_plane);
    let batch = Arc::new(batch);
    let health = HealthRegistry::new();

    let events = Arc::new(EventRecorder::new(control_plane.clone(), "pbs-scheduler"));
    let resolver = Arc::new(
        FitResolver::new(
            batch.clone(),
            control_plane.clone(),
            events.clone(),
            FitConfig {
                settle_delay: Duration::from_millis(10),
                ..Default::default()
            },
        )
        .with_health(health.clone()),
    );
    let coordinator = Arc::new(
        SchedulingCoordinator::new(
            resolver.clone(),
            control_plane.clone(),
            events,
            max_concurrent_pods,
        )
        .with_health(health.clone()),
    );

    Harness {
        control_plane,
        batch,
        resolver,
        coordinator,
        health,
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
