use std::time::{Duration, Instant};

use anyhow::Result;

pub async fn wait_until<F>(description: &str, timeout: Duration, mut cond: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut sleep_for = Duration::from_millis(5);

    loop {
        if cond() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timeout waiting for {description}");
        }

        tokio::time::sleep(sleep_for).await;
        sleep_for = (sleep_for * 2).min(Duration::from_millis(100));
    }
}
