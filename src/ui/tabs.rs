//! Tab registry rebuilt from `tabline_update`.

use rmpv::Value;

use crate::codec::MsgPackCodec;

/// Editor-assigned tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabHandle(pub u64);

impl TabHandle {
    /// Read a handle from the wire.
    ///
    /// The editor sends tabpages as msgpack ext values whose payload is an
    /// encoded integer; plain integers are accepted too.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Ext(_, data) => MsgPackCodec::decode_value(data)
                .ok()
                .and_then(|v| v.as_u64())
                .map(TabHandle),
            other => other.as_u64().map(TabHandle),
        }
    }
}

impl From<u64> for TabHandle {
    fn from(id: u64) -> Self {
        TabHandle(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub handle: TabHandle,
    pub name: String,
}

/// What a reader of the registry gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabView<'a> {
    /// A rebuild is in progress; show nothing (or a loading state).
    Loading,
    Ready {
        tabs: &'a [Tab],
        active: Option<TabHandle>,
    },
}

/// Ordered collection of open tabs.
#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: Vec<Tab>,
    active: Option<TabHandle>,
    rebuilding: bool,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every tab and start a rebuild.
    pub fn reset(&mut self) {
        self.tabs.clear();
        self.active = None;
        self.rebuilding = true;
    }

    /// Append one tab, marking it active when `is_active`.
    pub fn add(&mut self, handle: TabHandle, name: impl Into<String>, is_active: bool) {
        self.tabs.push(Tab {
            handle,
            name: name.into(),
        });
        if is_active {
            self.active = Some(handle);
        }
    }

    /// Finish a rebuild started by [`reset`](Self::reset).
    pub fn commit(&mut self) {
        self.rebuilding = false;
    }

    /// Consistent view for the renderer.
    pub fn view(&self) -> TabView<'_> {
        if self.rebuilding {
            TabView::Loading
        } else {
            TabView::Ready {
                tabs: &self.tabs,
                active: self.active,
            }
        }
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active(&self) -> Option<TabHandle> {
        self.active
    }

    pub fn is_active(&self, handle: TabHandle) -> bool {
        self.active == Some(handle)
    }

    pub fn contains(&self, handle: TabHandle) -> bool {
        self.tabs.iter().any(|t| t.handle == handle)
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_then_add() {
        let mut tabs = TabRegistry::new();
        tabs.reset();
        tabs.add(TabHandle(1), "main", true);
        tabs.add(TabHandle(2), "help", false);

        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs.active(), Some(TabHandle(1)));
        assert!(tabs.is_active(TabHandle(1)));
        assert!(!tabs.is_active(TabHandle(2)));
    }

    #[test]
    fn test_view_is_loading_during_rebuild() {
        let mut tabs = TabRegistry::new();
        tabs.reset();
        tabs.add(TabHandle(1), "main", true);

        assert_eq!(tabs.view(), TabView::Loading);

        tabs.commit();
        match tabs.view() {
            TabView::Ready { tabs: list, active } => {
                assert_eq!(list.len(), 1);
                assert_eq!(active, Some(TabHandle(1)));
            }
            TabView::Loading => panic!("still loading"),
        }
    }

    #[test]
    fn test_reset_replaces_previous_list() {
        let mut tabs = TabRegistry::new();
        tabs.reset();
        tabs.add(TabHandle(1), "a", false);
        tabs.add(TabHandle(2), "b", true);
        tabs.commit();

        tabs.reset();
        tabs.add(TabHandle(3), "c", true);
        tabs.commit();

        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs.tabs()[0].name, "c");
        assert_eq!(tabs.active(), Some(TabHandle(3)));
    }

    #[test]
    fn test_empty_rebuild_has_no_active_tab() {
        let mut tabs = TabRegistry::new();
        tabs.reset();
        tabs.add(TabHandle(1), "main", true);
        tabs.commit();

        tabs.reset();
        tabs.commit();

        assert_eq!(tabs.active(), None);
        assert!(tabs.is_empty());
        assert!(!tabs.is_rebuilding());
    }

    #[test]
    fn test_handle_from_ext_value() {
        let payload = MsgPackCodec::encode_value(&Value::from(7)).unwrap();
        let value = Value::Ext(2, payload);

        assert_eq!(TabHandle::from_value(&value), Some(TabHandle(7)));
        assert_eq!(TabHandle::from_value(&Value::from(9)), Some(TabHandle(9)));
        assert_eq!(TabHandle::from_value(&Value::from("x")), None);
    }
}
