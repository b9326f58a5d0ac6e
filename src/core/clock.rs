//! 时钟抽象：调度器通过它测量周期耗时并做节拍休眠
//!
//! 默认实现基于 tokio::time，测试中配合 `start_paused` 可以在不真实等待的情况下推进时间。

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
