use std::sync::Arc;
use std::time::Duration;

use poll_pool::channels::MemoryChannel;
use poll_pool::{PollOptions, PollPool, PollResult, PoolConfig, poller_fn};

/// Two agents share one job: the first polls, both receive the outcome.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // POLL_POOL_URL=file:///tmp/poll-pool.log shares the log with other processes.
    let base = PoolConfig::from_env_or_client(MemoryChannel::new("demo"))?;

    eprintln!("Poll Pool v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Channel: {}", base.url.as_deref().unwrap_or("in-memory"));
    eprintln!("   Collection: {}", base.collection);

    let agent_a = PollPool::connect(base.clone().agent_name("demo-agent-a")).await?;
    let agent_b = PollPool::connect(base.agent_name("demo-agent-b")).await?;

    let poller = poller_fn(|ctx, run_index| async move {
        eprintln!("   {} running {} (run {})", ctx.agent, ctx.key, run_index);
        if run_index < 5 {
            Ok(PollResult::reschedule(100))
        } else {
            Ok(PollResult::complete()
                .with_field("ok", true)
                .with_field("runs", run_index))
        }
    });

    let first = agent_a
        .start_polling(
            PollOptions::new("sharedjob", Arc::clone(&poller))
                .duration(Duration::from_secs(10))
                .on_progress(|update| {
                    if let Ok(event) = update {
                        eprintln!("   agent-a progress at {}", event.time);
                    }
                }),
        )
        .await?;

    // Give agent B time to observe agent A's claim.
    while agent_b.active_poller("sharedjob").await.is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let second = agent_b
        .start_polling(PollOptions::new("sharedjob", poller))
        .await?;

    let (a, b) = tokio::join!(first.wait(), second.wait());
    let a = a?;
    let b = b?;

    println!("agent-a result: {}", serde_json::to_string(&a.result)?);
    println!("agent-b result: {}", serde_json::to_string(&b.result)?);

    agent_a.shutdown().await;
    agent_b.shutdown().await;
    Ok(())
}
