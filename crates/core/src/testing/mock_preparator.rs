//! Mock preparator for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

use crate::catalog::ProductDescriptor;
use crate::order::SelectedOption;
use crate::preparator::{
    CustomizedArtifact, FetchedArtifact, ItemContext, PlacementResult, Preparator,
    PreparatorError,
};
use crate::processor::Step;

/// Scripted behavior of one step for one catalog identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepScript {
    /// Fail transiently this many times, then succeed.
    TransientTimes(u32),
    /// Always fail transiently.
    Transient,
    /// Fail with a non-retryable error.
    Fatal,
}

/// A recorded step invocation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub identifier: String,
    pub item_id: String,
    pub step: Step,
}

/// Holds one step invocation until released.
///
/// A gate is consumed by the first invocation that reaches it.
#[derive(Debug, Clone, Default)]
pub struct StepGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl StepGate {
    /// Wait until a step invocation is parked at this gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked invocation continue.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

type StepKey = (String, Step);

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<StepKey, StepScript>,
    failures: HashMap<StepKey, u32>,
    gates: HashMap<StepKey, StepGate>,
    delays: HashMap<String, Duration>,
    calls: Vec<RecordedCall>,
    cancelled: Vec<String>,
    options: HashMap<String, Vec<SelectedOption>>,
    placements: Vec<PlacementResult>,
}

/// Mock implementation of the Preparator trait.
///
/// Provides controllable behavior for testing:
/// - Script transient or fatal failures per identifier and step
/// - Hold a step open with a [`StepGate`]
/// - Delay an identifier's fetch
/// - Record every call, cancellation and placement
///
/// Clones share state, so a test can keep one handle while the pipeline
/// owns another.
///
/// # Example
///
/// ```rust,ignore
/// use oseo_core::testing::{MockPreparator, StepScript};
/// use oseo_core::processor::Step;
///
/// let preparator = MockPreparator::new();
/// preparator.script("S2A_001", Step::Fetch, StepScript::TransientTimes(2));
///
/// // ... run the pipeline ...
///
/// assert_eq!(preparator.calls_for("S2A_001"), vec!["fetch", "fetch", "fetch", "customize", "place"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockPreparator {
    state: Arc<RwLock<State>>,
}

impl MockPreparator {
    /// Create a mock preparator where every step succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        match self.state.read() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Script the behavior of `step` for `identifier`.
    pub fn script(&self, identifier: &str, step: Step, script: StepScript) {
        self.write(|s| {
            s.scripts.insert((identifier.to_string(), step), script);
        });
    }

    /// Park the next invocation of `step` for `identifier`.
    pub fn hold(&self, identifier: &str, step: Step) -> StepGate {
        let gate = StepGate::default();
        self.write(|s| {
            s.gates.insert((identifier.to_string(), step), gate.clone());
        });
        gate
    }

    /// Make fetching `identifier` take `delay`.
    pub fn delay(&self, identifier: &str, delay: Duration) {
        self.write(|s| {
            s.delays.insert(identifier.to_string(), delay);
        });
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.read(|s| s.calls.clone())
    }

    /// Steps invoked for `identifier`, in order.
    pub fn calls_for(&self, identifier: &str) -> Vec<&'static str> {
        self.read(|s| {
            s.calls
                .iter()
                .filter(|c| c.identifier == identifier)
                .map(|c| c.step.as_str())
                .collect()
        })
    }

    /// Item IDs passed to `cancel`.
    pub fn cancelled_items(&self) -> Vec<String> {
        self.read(|s| s.cancelled.clone())
    }

    /// Options the last customize call for `identifier` received.
    pub fn customize_options(&self, identifier: &str) -> Vec<SelectedOption> {
        self.read(|s| s.options.get(identifier).cloned().unwrap_or_default())
    }

    /// Successful placements.
    pub fn placements(&self) -> Vec<PlacementResult> {
        self.read(|s| s.placements.clone())
    }

    async fn enter_step(&self, ctx: &ItemContext, step: Step) -> Result<(), PreparatorError> {
        let key = (ctx.identifier.clone(), step);
        let (gate, delay) = self.write(|s| {
            s.calls.push(RecordedCall {
                identifier: ctx.identifier.clone(),
                item_id: ctx.item_id.clone(),
                step,
            });
            let delay = match step {
                Step::Fetch => s.delays.get(&ctx.identifier).copied(),
                _ => None,
            };
            (s.gates.remove(&key), delay)
        });

        if let Some(gate) = gate {
            gate.pass().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.write(|s| match s.scripts.get(&key).copied() {
            None => Ok(()),
            Some(StepScript::Fatal) => Err(PreparatorError::Fatal(format!(
                "scripted {} failure for {}",
                step, ctx.identifier
            ))),
            Some(StepScript::Transient) => Err(PreparatorError::Transient(format!(
                "scripted {} failure for {}",
                step, ctx.identifier
            ))),
            Some(StepScript::TransientTimes(times)) => {
                let failures = s.failures.entry(key.clone()).or_insert(0);
                if *failures < times {
                    *failures += 1;
                    Err(PreparatorError::Transient(format!(
                        "scripted {} failure {} of {} for {}",
                        step, failures, times, ctx.identifier
                    )))
                } else {
                    Ok(())
                }
            }
        })
    }
}

#[async_trait]
impl Preparator for MockPreparator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(
        &self,
        ctx: &ItemContext,
        descriptor: &ProductDescriptor,
    ) -> Result<FetchedArtifact, PreparatorError> {
        self.enter_step(ctx, Step::Fetch).await?;
        let file_name = descriptor.delivery_name();
        Ok(FetchedArtifact {
            item_id: ctx.item_id.clone(),
            path: PathBuf::from("/staging").join(&ctx.item_id).join(&file_name),
            file_name,
            size_bytes: descriptor.size_bytes.unwrap_or(1024),
        })
    }

    async fn customize(
        &self,
        ctx: &ItemContext,
        artifact: &FetchedArtifact,
        options: &[SelectedOption],
    ) -> Result<CustomizedArtifact, PreparatorError> {
        self.write(|s| {
            s.options.insert(ctx.identifier.clone(), options.to_vec());
        });
        self.enter_step(ctx, Step::Customize).await?;
        Ok(CustomizedArtifact::passthrough(artifact, options))
    }

    async fn place(
        &self,
        ctx: &ItemContext,
        artifact: &CustomizedArtifact,
    ) -> Result<PlacementResult, PreparatorError> {
        self.enter_step(ctx, Step::Place).await?;
        let result = PlacementResult {
            path: PathBuf::from("/delivery")
                .join(&ctx.user)
                .join(&ctx.order_id)
                .join(&artifact.file_name),
            size_bytes: artifact.size_bytes,
            checksum: None,
        };
        self.write(|s| s.placements.push(result.clone()));
        Ok(result)
    }

    async fn cancel(&self, item_id: &str) {
        self.write(|s| s.cancelled.push(item_id.to_string()));
    }
}
