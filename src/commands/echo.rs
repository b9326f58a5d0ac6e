//! Echo 命令（测试用）：原样返回参数

use async_trait::async_trait;

use crate::commands::{CommandHandler, Params, Payload};
use crate::core::AgentError;

pub struct EchoCommand;

#[async_trait]
impl CommandHandler for EchoCommand {
    fn description(&self) -> &str {
        "Echo the given params back (for testing)"
    }

    async fn invoke(&self, _command: &str, params: Params) -> Result<Payload, AgentError> {
        Ok(params)
    }
}
