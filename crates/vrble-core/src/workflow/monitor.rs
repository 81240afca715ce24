//! 持续监听
//!
//! 反复执行 [`Fetcher::run_once`]，成功后按固定间隔等待，失败或未找到设备
//! 时按指数退避等待。取消只在两次尝试之间生效，不会打断进行中的传输。

use log::{info, warn};

use crate::ble::Radio;
use crate::config::FetchSettings;
use crate::workflow::fetch::{FetchOutcome, FetchProgressCallback, Fetcher};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// 成功后的等待间隔，也是退避的基数
    pub interval: Duration,
    /// 退避上限
    pub max_backoff: Duration,
    /// 最多尝试次数，`None` 表示直到取消
    pub max_attempts: Option<usize>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from(&FetchSettings::default())
    }
}

impl From<&FetchSettings> for MonitorOptions {
    fn from(settings: &FetchSettings) -> Self {
        Self {
            interval: settings.monitor_interval(),
            max_backoff: settings.monitor_max_backoff(),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub attempts: usize,
    /// 完整收到的文件数
    pub received: usize,
    /// 保存了但不完整的文件数
    pub partial: usize,
    pub not_found: usize,
    pub failures: usize,
}

pub struct Monitor {
    options: MonitorOptions,
}

impl Monitor {
    pub fn new(options: MonitorOptions) -> Self {
        Self { options }
    }

    /// 连续失败 `failures` 次后的等待时间 (不含抖动)
    ///
    /// `interval * 2^(failures-1)`，不超过 `max_backoff`。
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.options.interval;
        }
        let factor = 1u32 << (failures - 1).min(16);
        self.options
            .interval
            .saturating_mul(factor)
            .min(self.options.max_backoff)
    }

    fn exhausted(&self, attempts: usize) -> bool {
        self.options.max_attempts.is_some_and(|max| attempts >= max)
    }

    pub async fn run<R, C>(
        &self,
        fetcher: &Fetcher<R>,
        callback: &C,
        cancel: CancellationToken,
    ) -> MonitorSummary
    where
        R: Radio,
        C: FetchProgressCallback + ?Sized,
    {
        let mut summary = MonitorSummary::default();
        let mut failures: u32 = 0;

        while !cancel.is_cancelled() && !self.exhausted(summary.attempts) {
            summary.attempts += 1;
            info!("Fetch attempt #{}", summary.attempts);

            let succeeded = match fetcher.run_once(callback).await {
                Ok(FetchOutcome::Received(report)) if report.is_complete() => {
                    summary.received += 1;
                    true
                }
                Ok(FetchOutcome::Received(report)) => {
                    warn!(
                        "Partial transfer saved to {:?} ({})",
                        report.path, report.end
                    );
                    summary.partial += 1;
                    false
                }
                Ok(FetchOutcome::DeviceNotFound) => {
                    summary.not_found += 1;
                    false
                }
                Err(e) => {
                    warn!("Fetch attempt failed: {}", e);
                    summary.failures += 1;
                    false
                }
            };

            if self.exhausted(summary.attempts) {
                break;
            }

            failures = if succeeded { 0 } else { failures.saturating_add(1) };
            let delay = jitter(self.backoff_delay(failures));

            callback.on_status(&format!("{:.1} 秒后再次扫描...", delay.as_secs_f32()));
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("Monitoring stopped after {} attempt(s)", summary.attempts);
        summary
    }
}

/// 加上至多 10% 的随机抖动
fn jitter(delay: Duration) -> Duration {
    let max_ms = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::DeviceFilter;
    use crate::testing::{ScriptedRadio, quest_device, transfer_link};
    use crate::workflow::fetch::{FetchOptions, SimpleFetchCallback};

    fn monitor(interval_ms: u64, max_attempts: Option<usize>) -> Monitor {
        Monitor::new(MonitorOptions {
            interval: Duration::from_millis(interval_ms),
            max_backoff: Duration::from_millis(interval_ms * 8),
            max_attempts,
        })
    }

    fn fetcher(radio: ScriptedRadio) -> Fetcher<ScriptedRadio> {
        Fetcher::new(
            radio,
            FetchOptions {
                filter: DeviceFilter::by_name("Quest"),
                output_dir: std::env::temp_dir()
                    .join(format!("vrble-monitor-{}", uuid::Uuid::new_v4())),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let m = Monitor::new(MonitorOptions {
            interval: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            max_attempts: None,
        });

        assert_eq!(m.backoff_delay(0), Duration::from_secs(10));
        assert_eq!(m.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(m.backoff_delay(2), Duration::from_secs(20));
        assert_eq!(m.backoff_delay(3), Duration::from_secs(40));
        assert_eq!(m.backoff_delay(4), Duration::from_secs(60));
        assert_eq!(m.backoff_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let d = jitter(base);
            assert!(d >= base && d <= Duration::from_secs(11));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let fetcher = fetcher(ScriptedRadio::new(None));
        let (callback, _rx) = SimpleFetchCallback::new();

        let summary = monitor(1, Some(3))
            .run(&fetcher, &callback, CancellationToken::new())
            .await;

        assert_eq!(
            summary,
            MonitorSummary {
                attempts: 3,
                not_found: 3,
                ..Default::default()
            }
        );
        assert_eq!(fetcher.radio().discover_calls(), 3);
    }

    #[tokio::test]
    async fn test_zero_max_attempts_runs_nothing() {
        let fetcher = fetcher(ScriptedRadio::new(Some(quest_device())));
        let (callback, _rx) = SimpleFetchCallback::new();

        let summary = monitor(1, Some(0))
            .run(&fetcher, &callback, CancellationToken::new())
            .await;

        assert_eq!(summary, MonitorSummary::default());
        assert_eq!(fetcher.radio().discover_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fetcher = fetcher(ScriptedRadio::new(None));
        let (callback, _rx) = SimpleFetchCallback::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = monitor(1, None).run(&fetcher, &callback, cancel).await;

        assert_eq!(summary.attempts, 0);
        assert_eq!(fetcher.radio().discover_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let radio = ScriptedRadio::new(Some(quest_device()));
        radio.push_link(transfer_link("a.txt", "3", vec![b"abc".to_vec()]));
        let fetcher = fetcher(radio);
        let (callback, _rx) = SimpleFetchCallback::new();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        // 间隔一小时，只能靠取消退出
        let summary = monitor(3_600_000, None)
            .run(&fetcher, &callback, cancel)
            .await;

        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.received, 1);

        let dir = &fetcher.options().output_dir;
        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        // 能发现但连接总是失败
        let fetcher = fetcher(ScriptedRadio::new(Some(quest_device())));
        let (callback, _rx) = SimpleFetchCallback::new();

        let summary = monitor(1, Some(2))
            .run(&fetcher, &callback, CancellationToken::new())
            .await;

        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.failures, 2);
        assert_eq!(fetcher.radio().connect_calls(), 2);
    }
}
