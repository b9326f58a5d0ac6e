//! 决策函数：每个周期调用一次，基于上下文快照选出至多一个动作
//!
//! 决策必须是纯函数（不修改调度器内部状态）；具体的选择策略由宿主提供。

use serde::{Deserialize, Serialize};

use crate::commands::Params;
use crate::context::ContextSnapshot;

/// 要通过命令注册表执行的动作
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub command: String,
    #[serde(default)]
    pub params: Params,
}

impl Action {
    pub fn new(command: impl Into<String>, params: Params) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }
}

pub trait Decider: Send + Sync {
    fn decide(&self, context: &ContextSnapshot) -> Option<Action>;
}

impl<F> Decider for F
where
    F: Fn(&ContextSnapshot) -> Option<Action> + Send + Sync,
{
    fn decide(&self, context: &ContextSnapshot) -> Option<Action> {
        self(context)
    }
}

/// 默认决策：从不行动
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverAct;

impl Decider for NeverAct {
    fn decide(&self, _context: &ContextSnapshot) -> Option<Action> {
        None
    }
}
