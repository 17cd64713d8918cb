use serde::{Deserialize, Serialize};

use crate::config::ProviderKind;
use crate::types::{ChatTurn, Role};

/// 会话状态 仅追加的对话历史加上当前选中的供应商
///
/// 每个进程同时只存在一个活跃 Session 由 Dispatcher 独占修改
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Session {
    turns: Vec<ChatTurn>,
    selected: Option<ProviderKind>,
}

impl Session {
    /// 创建空会话
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条用户消息
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn::new(Role::User, text));
    }

    /// 追加一条助手消息
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn::new(Role::Assistant, text));
    }

    /// 按时间顺序返回全部历史
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// 当前选中的供应商
    pub fn selected(&self) -> Option<ProviderKind> {
        self.selected
    }

    /// 切换供应商 不清空历史
    pub fn select(&mut self, kind: ProviderKind) {
        self.selected = Some(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_are_appended_in_order() {
        let mut session = Session::new();
        session.push_user("hello");
        session.push_assistant("hi there");
        session.push_user("how are you?");

        let roles: Vec<Role> = session.turns().iter().map(|turn| turn.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(session.turns()[1].text, "hi there");
    }

    #[test]
    fn selection_does_not_touch_history() {
        let mut session = Session::new();
        session.push_user("hello");
        session.select(ProviderKind::OpenAi);
        session.select(ProviderKind::OpenAi);

        assert_eq!(session.selected(), Some(ProviderKind::OpenAi));
        assert_eq!(session.turns().len(), 1);
    }
}
