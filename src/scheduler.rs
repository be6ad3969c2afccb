use anyhow::Context;
use log::info;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Run `pass` every `interval` until shutdown is signalled.
///
/// A pass in progress is always allowed to finish; the shutdown signal only
/// interrupts the sleep between passes. A pass error ends the loop and is
/// returned to the caller.
pub async fn run_periodic<F, Fut, T>(
    name: &str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut pass: F,
) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    info!("{} started ...", name);
    loop {
        if *shutdown.borrow() {
            break;
        }

        pass().await.with_context(|| format!("{} pass failed", name))?;

        info!("{}: sleeping for {}", name, format_interval(interval));
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            changed = shutdown.changed() => {
                // A dropped sender also means shut down
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("{} stopped", name);
    Ok(())
}

/// Human-readable interval for log lines.
pub fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}min", secs / 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", interval.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::from_secs(6 * 3600)), "6h");
        assert_eq!(format_interval(Duration::from_secs(300)), "5min");
        assert_eq!(format_interval(Duration::from_secs(90)), "90s");
        assert_eq!(format_interval(Duration::from_millis(20)), "20ms");
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicUsize::new(0));

        let handle = {
            let count = count.clone();
            tokio::spawn(async move {
                run_periodic("test", Duration::from_millis(5), rx, || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(())
                    }
                })
                .await
            })
        };

        while count.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_long_sleep() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            run_periodic("test", Duration::from_secs(3600), rx, || async {
                Ok::<_, anyhow::Error>(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop promptly");
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_pass_error_ends_loop() {
        let (_tx, rx) = watch::channel(false);
        let count = AtomicUsize::new(0);
        let err = run_periodic("failing", Duration::from_millis(1), rx, || {
            let n = count.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 2 {
                    anyhow::bail!("boom");
                }
                Ok(())
            }
        })
        .await
        .unwrap_err();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(format!("{:#}", err).contains("failing pass failed"));
        assert!(format!("{:#}", err).contains("boom"));
    }

    #[tokio::test]
    async fn test_already_shut_down_runs_nothing() {
        let (_tx, rx) = watch::channel(true);
        let count = AtomicUsize::new(0);
        run_periodic("idle", Duration::from_millis(1), rx, || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, anyhow::Error>(()) }
        })
        .await
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
