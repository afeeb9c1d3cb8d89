use std::sync::{Arc, RwLock};

use serde_json::Value;

/// 比赛/场次元数据，处理每张图片时取一次快照
#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<Value>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, metadata: Value) {
        match self.inner.write() {
            Ok(mut slot) => *slot = Some(metadata),
            Err(poisoned) => *poisoned.into_inner() = Some(metadata),
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn snapshot(&self) -> Option<Value> {
        match self.inner.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_is_detached() {
        let ctx = SessionContext::new();
        assert!(ctx.snapshot().is_none());

        ctx.set(json!({"race": "Monza", "session": "Race"}));
        let snap = ctx.snapshot().unwrap();
        ctx.set(json!({"race": "Monza", "session": "Quali"}));
        assert_eq!(snap["session"], "Race");

        let shared = ctx.clone();
        shared.clear();
        assert!(ctx.snapshot().is_none());
    }
}
