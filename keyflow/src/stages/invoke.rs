//! Uniform execution wrapper around opaque stages.

use crate::context::{StageContext, StateMap};
use crate::core::StageOutput;
use crate::errors::StageFailure;
use crate::pipeline::StageSpec;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Runs one stage under its timeout and checks its output contract.
///
/// Returns exactly the declared output values on success. A stage that
/// reports failure, overruns its timeout, panics, or returns a key set other
/// than its declared outputs yields the matching [`StageFailure`].
pub async fn invoke_stage(spec: &StageSpec, ctx: StageContext) -> Result<StateMap, StageFailure> {
    let runner = Arc::clone(&spec.runner);
    let execution = async move { runner.execute(&ctx).await };

    match tokio::time::timeout(spec.timeout, AssertUnwindSafe(execution).catch_unwind()).await {
        Err(_) => Err(StageFailure::Timeout {
            stage: spec.name.clone(),
            timeout: spec.timeout,
        }),
        Ok(Err(payload)) => Err(StageFailure::Panicked {
            stage: spec.name.clone(),
            message: panic_message(payload.as_ref()),
        }),
        Ok(Ok(output)) => check_output(spec, output),
    }
}

fn check_output(spec: &StageSpec, output: StageOutput) -> Result<StateMap, StageFailure> {
    if output.is_failure() {
        return Err(StageFailure::Execution {
            stage: spec.name.clone(),
            reason: output
                .error
                .unwrap_or_else(|| "stage reported failure without a reason".to_string()),
        });
    }

    let returned: BTreeSet<&String> = output.data.keys().collect();
    let declared: BTreeSet<&String> = spec.produced_outputs.iter().collect();
    if returned != declared {
        let unexpected: Vec<&String> = returned.difference(&declared).copied().collect();
        let missing: Vec<&String> = declared.difference(&returned).copied().collect();
        return Err(StageFailure::ContractViolation {
            stage: spec.name.clone(),
            reason: format!("unexpected keys {unexpected:?}, missing keys {missing:?}"),
        });
    }

    Ok(output.data)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StateSnapshot;
    use crate::stages::{FnStage, Stage};
    use crate::testing::{PanickingStage, SlowStage};
    use std::time::Duration;
    use uuid::Uuid;

    fn ctx(name: &str) -> StageContext {
        StageContext::new(name, Uuid::new_v4(), StateSnapshot::default())
    }

    fn spec(stage: Arc<dyn Stage>, outputs: &[&str]) -> StageSpec {
        StageSpec::new(stage.name().to_string(), stage)
            .with_outputs(outputs.iter().copied())
            .with_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_declared_outputs_pass_through() {
        let stage = Arc::new(FnStage::new("parser", |_ctx| {
            StageOutput::ok_value("parsed", serde_json::json!({"endpoints": 3}))
        }));

        let data = invoke_stage(&spec(stage, &["parsed"]), ctx("parser"))
            .await
            .unwrap();
        assert_eq!(data.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_output_is_execution_failure() {
        let stage = Arc::new(FnStage::new("parser", |_ctx| StageOutput::fail("bad json")));

        let err = invoke_stage(&spec(stage, &["parsed"]), ctx("parser"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StageFailure::Execution {
                stage: "parser".to_string(),
                reason: "bad json".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_keys_are_contract_violation() {
        let stage = Arc::new(FnStage::new("parser", |_ctx| {
            StageOutput::ok_value("surprise", serde_json::json!(1))
        }));

        let err = invoke_stage(&spec(stage, &["parsed"]), ctx("parser"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageFailure::ContractViolation { .. }));
        assert!(!err.is_routable());
    }

    #[tokio::test]
    async fn test_timeout() {
        let stage = Arc::new(SlowStage::new("analyzer", Duration::from_secs(5)));

        let err = invoke_stage(&spec(stage, &[]), ctx("analyzer"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.stage(), "analyzer");
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let stage = Arc::new(PanickingStage::new("tester", "assertion blew up"));

        let err = invoke_stage(&spec(stage, &[]), ctx("tester"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StageFailure::Panicked {
                stage: "tester".to_string(),
                message: "assertion blew up".to_string(),
            }
        );
    }
}
