use async_trait::async_trait;

/// A hardware reading source polled once per tick. `None` means the data
/// was not ready this time; callers skip the tick and carry on.
#[async_trait]
pub trait SensorSource: Send {
    type Reading: Send;

    async fn try_read(&mut self) -> Option<Self::Reading>;
}
