use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// One binding in the immutable value chain of a context.
pub(super) struct ValueNode {
    key: Cow<'static, str>,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueNode>>,
}

impl ValueNode {
    pub(super) fn push(
        parent: Option<Arc<ValueNode>>,
        key: Cow<'static, str>,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self { key, value, parent })
    }

    /// Walks towards the root; the nearest binding for `key` wins.
    pub(super) fn lookup(&self, key: &str) -> Option<&Arc<dyn Any + Send + Sync>> {
        let mut node = Some(self);
        while let Some(n) = node {
            if n.key == key {
                return Some(&n.value);
            }
            node = n.parent.as_deref();
        }
        None
    }

    pub(super) fn keys(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut node = Some(self);
        while let Some(n) = node {
            if !out.contains(&n.key.as_ref()) {
                out.push(n.key.as_ref());
            }
            node = n.parent.as_deref();
        }
        out
    }
}

impl fmt::Debug for ValueNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}
