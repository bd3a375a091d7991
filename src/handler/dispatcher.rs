//! Routing of decoded events.
//!
//! Every [`RedrawEvent`] goes to exactly one place: a built-in handler that
//! updates the UI state and forwards one render call, or, for events the
//! session does not understand, the extension registered under that name.

use crate::error::{Result, VimwireError};
use crate::ui::{ModeRegistry, RedrawEvent, TabRegistry};

use super::{ExtensionContext, ExtensionRegistry, Renderer};

/// State mutated by built-in handlers. Only the owner task touches it.
#[derive(Debug, Default)]
pub struct UiState {
    pub modes: ModeRegistry,
    pub tabs: TabRegistry,
    pub mouse_enabled: bool,
    pub busy: bool,
    /// Last mode reported by `mode_change`.
    pub current_mode: Option<String>,
}

/// Where an event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Internal,
    Extension,
    /// Unknown event with no extension registered.
    Ignored,
}

/// Routes events to built-in handlers or extensions.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    extensions: ExtensionRegistry,
}

impl EventDispatcher {
    pub fn new(extensions: ExtensionRegistry) -> Self {
        Self { extensions }
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Route one event.
    ///
    /// A failing extension yields [`VimwireError::ExtensionCallback`] and
    /// whatever it queued on `ctx` before failing is discarded.
    pub fn dispatch<R: Renderer + ?Sized>(
        &self,
        event: RedrawEvent,
        ui: &mut UiState,
        renderer: &mut R,
        ctx: &mut ExtensionContext,
    ) -> Result<Route> {
        let (name, args) = match event {
            RedrawEvent::Unknown { name, args } => (name, args),
            event => {
                apply(event, ui, renderer);
                return Ok(Route::Internal);
            }
        };

        let Some(extension) = self.extensions.get(&name) else {
            tracing::trace!("No handler for '{}'", name);
            return Ok(Route::Ignored);
        };

        let mark = ctx.queued();
        ctx.set_event(&name);
        match extension.call(&args, ctx) {
            Ok(()) => Ok(Route::Extension),
            Err(e) => {
                ctx.truncate(mark);
                Err(VimwireError::ExtensionCallback {
                    name,
                    message: e.to_string(),
                })
            }
        }
    }
}

fn apply<R: Renderer + ?Sized>(event: RedrawEvent, ui: &mut UiState, renderer: &mut R) {
    match event {
        RedrawEvent::Resize { cols, rows } => renderer.resize(cols, rows),
        RedrawEvent::Clear => renderer.clear(),
        RedrawEvent::EolClear => renderer.eol_clear(),
        RedrawEvent::CursorGoto { row, col } => renderer.cursor_goto(row, col),
        RedrawEvent::ModeInfoSet {
            cursor_style_enabled,
            modes,
        } => {
            ui.modes.set_cursor_style_enabled(cursor_style_enabled);
            ui.modes.replace_all(modes);
            // Re-resolve the active mode against the new table.
            if let Some(name) = ui.current_mode.as_deref() {
                renderer.mode_change(name, ui.modes.lookup(name));
            }
        }
        RedrawEvent::ModeChange { name, .. } => {
            let mode = ui.modes.lookup(&name);
            if mode.is_none() {
                tracing::debug!("Mode '{}' was never described by mode_info_set", name);
            }
            renderer.mode_change(&name, mode);
            ui.current_mode = Some(name);
        }
        RedrawEvent::BusyStart => {
            ui.busy = true;
            renderer.busy(true);
        }
        RedrawEvent::BusyStop => {
            ui.busy = false;
            renderer.busy(false);
        }
        RedrawEvent::MouseOn => {
            ui.mouse_enabled = true;
            renderer.mouse(true);
        }
        RedrawEvent::MouseOff => {
            ui.mouse_enabled = false;
            renderer.mouse(false);
        }
        RedrawEvent::SetScrollRegion {
            top,
            bot,
            left,
            right,
        } => renderer.set_scroll_region(top, bot, left, right),
        RedrawEvent::Scroll(count) => renderer.scroll(count),
        RedrawEvent::HighlightSet(attrs) => renderer.highlight_set(&attrs),
        RedrawEvent::Put { text, cells } => renderer.put(&text, cells),
        RedrawEvent::Bell => renderer.bell(false),
        RedrawEvent::VisualBell => renderer.bell(true),
        RedrawEvent::Flush => renderer.flush(),
        RedrawEvent::UpdateFg(color) => renderer.update_fg(color),
        RedrawEvent::UpdateBg(color) => renderer.update_bg(color),
        RedrawEvent::UpdateSp(color) => renderer.update_sp(color),
        RedrawEvent::SetTitle(title) => renderer.set_title(&title),
        RedrawEvent::SetIcon(icon) => renderer.set_icon(&icon),
        RedrawEvent::PopupmenuShow {
            items,
            selected,
            row,
            col,
        } => renderer.popupmenu_show(&items, selected, row, col),
        RedrawEvent::PopupmenuSelect { selected } => renderer.popupmenu_select(selected),
        RedrawEvent::PopupmenuHide => renderer.popupmenu_hide(),
        RedrawEvent::TablineUpdate { current, tabs } => {
            ui.tabs.reset();
            for (handle, name) in tabs {
                ui.tabs.add(handle, name, handle == current);
            }
            ui.tabs.commit();
            if !ui.tabs.contains(current) {
                tracing::warn!("Active tab {:?} is not in the tab list", current);
            }
            renderer.tab_list(ui.tabs.tabs(), ui.tabs.active());
        }
        RedrawEvent::CmdlineShow(cmdline) => renderer.cmdline_show(&cmdline),
        RedrawEvent::CmdlinePos { pos, level } => renderer.cmdline_pos(pos, level),
        RedrawEvent::CmdlineHide => renderer.cmdline_hide(),
        RedrawEvent::WildmenuShow { items } => renderer.wildmenu_show(&items),
        RedrawEvent::WildmenuSelect { selected } => renderer.wildmenu_select(selected),
        RedrawEvent::WildmenuHide => renderer.wildmenu_hide(),
        RedrawEvent::Unknown { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerResult;
    use crate::ui::{CursorShape, Mode, TabHandle};
    use rmpv::Value;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl Renderer for Recorder {
        fn put(&mut self, text: &str, _cells: usize) {
            self.calls.push(format!("put {}", text));
        }

        fn mode_change(&mut self, name: &str, mode: Option<&Mode>) {
            self.calls
                .push(format!("mode {} {:?}", name, mode.map(|m| m.cursor_shape)));
        }

        fn tab_list(&mut self, tabs: &[crate::ui::Tab], active: Option<TabHandle>) {
            self.calls
                .push(format!("tabs {} {:?}", tabs.len(), active.map(|h| h.0)));
        }

        fn mouse(&mut self, enabled: bool) {
            self.calls.push(format!("mouse {}", enabled));
        }
    }

    fn run(dispatcher: &EventDispatcher, events: Vec<RedrawEvent>) -> (UiState, Recorder) {
        let mut ui = UiState::default();
        let mut renderer = Recorder::default();
        let mut ctx = ExtensionContext::default();
        for event in events {
            dispatcher
                .dispatch(event, &mut ui, &mut renderer, &mut ctx)
                .unwrap();
        }
        (ui, renderer)
    }

    #[test]
    fn test_internal_events_reach_renderer() {
        let dispatcher = EventDispatcher::default();
        let (ui, renderer) = run(
            &dispatcher,
            vec![
                RedrawEvent::MouseOn,
                RedrawEvent::Put {
                    text: "x".to_string(),
                    cells: 1,
                },
            ],
        );

        assert!(ui.mouse_enabled);
        assert_eq!(renderer.calls, vec!["mouse true", "put x"]);
    }

    #[test]
    fn test_mode_change_uses_registry() {
        let dispatcher = EventDispatcher::default();
        let (ui, renderer) = run(
            &dispatcher,
            vec![
                RedrawEvent::ModeInfoSet {
                    cursor_style_enabled: true,
                    modes: vec![Mode::new("insert").with_shape(CursorShape::Vertical, 25)],
                },
                RedrawEvent::ModeChange {
                    name: "insert".to_string(),
                    index: 0,
                },
                RedrawEvent::ModeChange {
                    name: "replace".to_string(),
                    index: 1,
                },
            ],
        );

        assert!(ui.modes.cursor_style_enabled());
        assert_eq!(ui.current_mode.as_deref(), Some("replace"));
        assert_eq!(
            renderer.calls,
            vec!["mode insert Some(Vertical)", "mode replace None"]
        );
    }

    #[test]
    fn test_tabline_rebuilds_registry() {
        let dispatcher = EventDispatcher::default();
        let (ui, renderer) = run(
            &dispatcher,
            vec![RedrawEvent::TablineUpdate {
                current: TabHandle(1),
                tabs: vec![
                    (TabHandle(1), "main".to_string()),
                    (TabHandle(2), "help".to_string()),
                ],
            }],
        );

        assert_eq!(ui.tabs.len(), 2);
        assert_eq!(ui.tabs.active(), Some(TabHandle(1)));
        assert!(!ui.tabs.is_rebuilding());
        assert_eq!(renderer.calls, vec!["tabs 2 Some(1)"]);
    }

    #[test]
    fn test_unknown_event_goes_to_extension() {
        let mut extensions = ExtensionRegistry::new();
        extensions.register("vimwire.open", |(path,): (String,), ctx: &mut ExtensionContext| {
            ctx.call("nvim_command", vec![Value::from(format!("edit {}", path))]);
            Ok(())
        });
        let dispatcher = EventDispatcher::new(extensions);

        let mut ui = UiState::default();
        let mut renderer = Recorder::default();
        let mut ctx = ExtensionContext::default();
        let route = dispatcher
            .dispatch(
                RedrawEvent::Unknown {
                    name: "vimwire.open".to_string(),
                    args: vec![Value::from("a.txt")],
                },
                &mut ui,
                &mut renderer,
                &mut ctx,
            )
            .unwrap();

        assert_eq!(route, Route::Extension);
        assert_eq!(ctx.event(), "vimwire.open");
        assert_eq!(ctx.queued(), 1);
        assert!(renderer.calls.is_empty());
    }

    #[test]
    fn test_unregistered_unknown_event_is_ignored() {
        let dispatcher = EventDispatcher::default();
        let mut ctx = ExtensionContext::default();
        let route = dispatcher
            .dispatch(
                RedrawEvent::Unknown {
                    name: "grid_line".to_string(),
                    args: vec![],
                },
                &mut UiState::default(),
                &mut Recorder::default(),
                &mut ctx,
            )
            .unwrap();

        assert_eq!(route, Route::Ignored);
    }

    #[test]
    fn test_failing_extension_is_reported_and_isolated() {
        let mut extensions = ExtensionRegistry::new();
        extensions.register_raw(
            "broken",
            |_: &[Value], ctx: &mut ExtensionContext| -> HandlerResult {
                ctx.notify("half_done", vec![]);
                Err(VimwireError::Extension("boom".to_string()))
            },
        );
        let dispatcher = EventDispatcher::new(extensions);

        let mut ui = UiState::default();
        let mut renderer = Recorder::default();
        let mut ctx = ExtensionContext::default();
        ctx.notify("earlier", vec![]);

        let result = dispatcher.dispatch(
            RedrawEvent::Unknown {
                name: "broken".to_string(),
                args: vec![],
            },
            &mut ui,
            &mut renderer,
            &mut ctx,
        );

        match result {
            Err(VimwireError::ExtensionCallback { name, message }) => {
                assert_eq!(name, "broken");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ctx.queued(), 1);

        // The next event is still handled.
        dispatcher
            .dispatch(RedrawEvent::MouseOff, &mut ui, &mut renderer, &mut ctx)
            .unwrap();
        assert_eq!(renderer.calls, vec!["mouse false"]);
    }
}
