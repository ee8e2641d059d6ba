//! Per-device task fan-out.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::report::PhaseValue;
use crate::device::Device;

/// How one device's task ended.
#[derive(Debug)]
pub(crate) enum TaskResult<T> {
    Done(T),
    Interrupted,
    Panicked(String),
}

impl<T: PhaseValue> TaskResult<T> {
    pub(crate) fn into_value(self) -> T {
        match self {
            Self::Done(value) => value,
            Self::Interrupted => T::interrupted(),
            Self::Panicked(message) => T::aborted(message),
        }
    }
}

/// Run `work` once per device as independent tasks and wait for all of them.
///
/// Results come back in device order regardless of completion order. A
/// cancelled token abandons the in-flight work (dropping any child process
/// it owns); a panicking task only affects its own device.
pub(crate) async fn fan_out<T, F, Fut>(
    devices: &[Device],
    cancel: &CancellationToken,
    work: F,
) -> Vec<(String, TaskResult<T>)>
where
    T: Send + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let (ids, handles): (Vec<String>, Vec<_>) = devices
        .iter()
        .map(|device| {
            let cancel = cancel.clone();
            let fut = work(device.id.clone());
            let handle = tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    value = fut => Some(value),
                }
            });
            (device.id.clone(), handle)
        })
        .unzip();

    let joined = futures::future::join_all(handles).await;

    ids.into_iter()
        .zip(joined)
        .map(|(id, result)| {
            let result = match result {
                Ok(Some(value)) => TaskResult::Done(value),
                Ok(None) => TaskResult::Interrupted,
                Err(e) => {
                    tracing::error!(device = %id, error = %e, "device task aborted");
                    TaskResult::Panicked(format!("device task aborted: {e}"))
                }
            };
            (id, result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::StepOutcome;
    use std::time::Duration;

    fn devices(ids: &[&str]) -> Vec<Device> {
        ids.iter().map(|id| Device::new(*id)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_device_order() {
        let cancel = CancellationToken::new();
        let results = fan_out(&devices(&["A", "B", "C"]), &cancel, |id| async move {
            // A finishes last.
            let delay = if id == "A" { 30 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            id
        })
        .await;

        let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["A", "B", "C"]);
        assert!(matches!(&results[0].1, TaskResult::Done(v) if v == "A"));
    }

    #[tokio::test]
    async fn panic_is_isolated_to_its_device() {
        let cancel = CancellationToken::new();
        let results = fan_out(&devices(&["A", "B"]), &cancel, |id| async move {
            if id == "B" {
                panic!("boom");
            }
            StepOutcome::Ok
        })
        .await;

        let values: Vec<StepOutcome> = results.into_iter().map(|(_, r)| r.into_value()).collect();
        assert_eq!(values[0], StepOutcome::Ok);
        assert!(matches!(
            &values[1],
            StepOutcome::Failed { message } if message.contains("aborted")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_pending_work() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let results = fan_out(&devices(&["A"]), &cancel, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            StepOutcome::Ok
        })
        .await;

        assert!(matches!(results[0].1, TaskResult::Interrupted));
    }

    #[tokio::test]
    async fn no_devices_no_tasks() {
        let cancel = CancellationToken::new();
        let results = fan_out(&[], &cancel, |_| async { StepOutcome::Ok }).await;
        assert!(results.is_empty());
    }
}
