use anyhow::Result;
use async_trait::async_trait;

pub mod admin;
pub mod authorization;
pub mod command;
pub mod endpoint;
pub mod log_file;
pub mod provider;
pub mod recorder;
pub mod registry;
pub mod time;
pub mod tls;
pub mod user;

pub use cdds_stub::cdds;

#[async_trait]
pub trait Handle<I> {
    type Response;

    async fn handle(&mut self, input: I) -> Result<Self::Response>;
}

#[async_trait]
pub trait Hook<I> {
    type Output;

    async fn hook(&mut self, input: I) -> Result<Self::Output>;
}

/// A hook that hands its input through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl<I> Hook<I> for PassThrough
where
    I: Send + 'static,
{
    type Output = I;

    async fn hook(&mut self, input: I) -> Result<Self::Output> {
        Ok(input)
    }
}
