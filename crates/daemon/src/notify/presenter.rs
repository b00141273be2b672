//! Maps service events to user-visible alerts and dialogs.
//!
//! Errors are always surfaced exactly once: as a modal dialog when the status
//! view is registered and focused, as a passive alert otherwise.

use std::sync::Arc;

use meshtether_protocol::{ClientRecord, ErrorKind};

use super::alert::{Alert, AlertAction, AlertId, LightPattern, Persistence, Sound};
use super::sink::AlertSink;
use crate::prefs::{keys, PreferenceStore};
use crate::status::{Dialog, ObserverRole, StatusFanout, ViewTab};

/// Title used on every alert.
pub const APP_NAME: &str = "MeshTether";

const TEXT_RUNNING: &str = "Mesh tethering is running";
const TEXT_CLIENT: &str = "New client:";
const TEXT_ERROR: &str = "Mesh tethering failed";

/// Where an error ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSurface {
    /// A dialog was requested on the focused status view.
    Modal(Dialog),
    /// A passive error alert was posted.
    Passive,
}

/// Presents service events to the user.
pub struct NotificationPresenter {
    sink: Arc<dyn AlertSink>,
    prefs: Arc<PreferenceStore>,
    fanout: Arc<StatusFanout>,
}

impl NotificationPresenter {
    pub fn new(
        sink: Arc<dyn AlertSink>,
        prefs: Arc<PreferenceStore>,
        fanout: Arc<StatusFanout>,
    ) -> Self {
        Self {
            sink,
            prefs,
            fanout,
        }
    }

    /// Posts the persistent "running" alert.
    pub fn on_running(&self) {
        tracing::debug!("Posting running alert");
        self.sink.post(Alert::new(
            AlertId::Running,
            APP_NAME,
            TEXT_RUNNING,
            Persistence::Ongoing,
            AlertAction::OpenStatus,
        ));
    }

    /// Posts a client alert if `client_notify` is enabled.
    ///
    /// Returns whether an alert was posted.
    pub fn on_client_added(&self, record: &ClientRecord) -> bool {
        if !self.prefs.get_bool(keys::CLIENT_NOTIFY, false) {
            return false;
        }

        let alert = Alert::new(
            AlertId::Client,
            APP_NAME,
            format!("{} {}", TEXT_CLIENT, record.nice_label()),
            Persistence::AutoCancel,
            AlertAction::ShowClients,
        )
        .with_sound(self.client_sound())
        .with_lights(
            self.prefs
                .get_bool(keys::CLIENT_LIGHT, false)
                .then_some(LightPattern::CLIENT),
        );

        self.sink.post(alert);
        true
    }

    fn client_sound(&self) -> Sound {
        if self.prefs.get_bool(keys::CLIENT_QUIET, false) {
            return Sound::Silent;
        }
        match self.prefs.get_string_opt(keys::CLIENT_SOUND) {
            Some(uri) if !uri.is_empty() => Sound::Custom(uri),
            _ => Sound::Default,
        }
    }

    /// Surfaces a worker failure.
    pub fn on_error(&self, kind: ErrorKind) -> ErrorSurface {
        let status = self.fanout.observer(ObserverRole::Status);
        let view = status
            .as_deref()
            .and_then(|observer| observer.interactive())
            .filter(|view| view.has_focus());

        match view {
            Some(view) => {
                let dialog = match kind {
                    ErrorKind::RootAccessDenied => Dialog::RootAccess,
                    ErrorKind::SupplicantFailure => Dialog::Supplicant,
                    ErrorKind::Other => {
                        view.select_tab(ViewTab::Links);
                        Dialog::Error
                    }
                };
                tracing::debug!(?dialog, "Showing error dialog");
                view.show_dialog(dialog);
                ErrorSurface::Modal(dialog)
            }
            None => {
                tracing::debug!(%kind, "Status view not focused, posting error alert");
                self.sink.post(Alert::new(
                    AlertId::Error,
                    APP_NAME,
                    format!("{}: {}", TEXT_ERROR, kind),
                    Persistence::AutoCancel,
                    AlertAction::OpenStatus,
                ));
                ErrorSurface::Passive
            }
        }
    }

    /// Clears the running and client alerts.
    pub fn on_stopped(&self) {
        self.sink.cancel(AlertId::Running);
        self.sink.cancel(AlertId::Client);
    }

    /// Forwards a progress message to the status view, if there is one.
    pub fn on_progress(&self, message: &str) {
        let status = self.fanout.observer(ObserverRole::Status);
        match status.as_deref().and_then(|observer| observer.interactive()) {
            Some(view) => view.show_progress(message),
            None => tracing::debug!("No status view for progress: {}", message),
        }
    }

    /// Dismisses the progress shown by [`on_progress`](Self::on_progress).
    pub fn hide_progress(&self) {
        let status = self.fanout.observer(ObserverRole::Status);
        if let Some(view) = status.as_deref().and_then(|observer| observer.interactive()) {
            view.hide_progress();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::sink::{AlertRecord, MemoryAlertSink};
    use crate::status::{InteractiveView, StatusObserver};
    use meshtether_protocol::ServiceState;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeStatusView {
        focused: AtomicBool,
        dialogs: Mutex<Vec<Dialog>>,
        tabs: Mutex<Vec<ViewTab>>,
        progress: Mutex<Vec<String>>,
        hides: AtomicUsize,
    }

    impl StatusObserver for FakeStatusView {
        fn update(&self, _state: ServiceState) {}

        fn interactive(&self) -> Option<&dyn InteractiveView> {
            Some(self)
        }
    }

    impl InteractiveView for FakeStatusView {
        fn has_focus(&self) -> bool {
            self.focused.load(Ordering::SeqCst)
        }

        fn show_dialog(&self, dialog: Dialog) {
            self.dialogs.lock().unwrap().push(dialog);
        }

        fn select_tab(&self, tab: ViewTab) {
            self.tabs.lock().unwrap().push(tab);
        }

        fn show_progress(&self, message: &str) {
            self.progress.lock().unwrap().push(message.to_string());
        }

        fn hide_progress(&self) {
            self.hides.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        _temp_dir: TempDir,
        sink: Arc<MemoryAlertSink>,
        prefs: Arc<PreferenceStore>,
        fanout: Arc<StatusFanout>,
        presenter: NotificationPresenter,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let sink = Arc::new(MemoryAlertSink::new());
        let prefs = Arc::new(PreferenceStore::new(temp_dir.path().join("prefs.json")));
        let fanout = Arc::new(StatusFanout::new("token", 4));
        let presenter = NotificationPresenter::new(
            Arc::clone(&sink) as Arc<dyn AlertSink>,
            Arc::clone(&prefs),
            Arc::clone(&fanout),
        );
        Fixture {
            _temp_dir: temp_dir,
            sink,
            prefs,
            fanout,
            presenter,
        }
    }

    fn client() -> ClientRecord {
        ClientRecord::new(IpAddr::V4(Ipv4Addr::new(192, 168, 5, 7))).with_hostname("phone")
    }

    #[test]
    fn test_on_running_posts_ongoing_alert() {
        let f = fixture();
        f.presenter.on_running();

        let posted = f.sink.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].id, AlertId::Running);
        assert_eq!(posted[0].persistence, Persistence::Ongoing);
        assert_eq!(posted[0].action, AlertAction::OpenStatus);
    }

    #[test]
    fn test_client_alert_disabled_by_default() {
        let f = fixture();
        assert!(!f.presenter.on_client_added(&client()));
        assert!(f.sink.records().is_empty());
    }

    #[test]
    fn test_client_alert_with_empty_sound_uses_default() {
        let f = fixture();
        f.prefs.set(keys::CLIENT_NOTIFY, true);
        f.prefs.set(keys::CLIENT_SOUND, "");

        assert!(f.presenter.on_client_added(&client()));
        let posted = f.sink.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].sound, Sound::Default);
        assert_eq!(posted[0].lights, None);
        assert_eq!(posted[0].persistence, Persistence::AutoCancel);
        assert_eq!(posted[0].action, AlertAction::ShowClients);
        assert!(posted[0].text.contains("phone (192.168.5.7)"));
    }

    #[test]
    fn test_client_alert_custom_sound_and_lights() {
        let f = fixture();
        f.prefs.set(keys::CLIENT_NOTIFY, true);
        f.prefs.set(keys::CLIENT_LIGHT, true);
        f.prefs.set(keys::CLIENT_SOUND, "file:///sdcard/ping.ogg");

        f.presenter.on_client_added(&client());
        let alert = &f.sink.posted()[0];
        assert_eq!(alert.sound, Sound::Custom("file:///sdcard/ping.ogg".to_string()));
        assert_eq!(alert.lights, Some(LightPattern::CLIENT));
    }

    #[test]
    fn test_client_alert_quiet_wins_over_custom_sound() {
        let f = fixture();
        f.prefs.set(keys::CLIENT_NOTIFY, true);
        f.prefs.set(keys::CLIENT_QUIET, true);
        f.prefs.set(keys::CLIENT_SOUND, "file:///sdcard/ping.ogg");

        f.presenter.on_client_added(&client());
        assert_eq!(f.sink.posted()[0].sound, Sound::Silent);
    }

    #[test]
    fn test_error_without_status_view_is_passive() {
        let f = fixture();
        assert_eq!(f.presenter.on_error(ErrorKind::Other), ErrorSurface::Passive);

        let posted = f.sink.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].id, AlertId::Error);
    }

    #[test]
    fn test_error_with_unfocused_view_is_passive_only() {
        let f = fixture();
        let view = Arc::new(FakeStatusView::default());
        f.fanout.register(ObserverRole::Status, &view);

        assert_eq!(
            f.presenter.on_error(ErrorKind::RootAccessDenied),
            ErrorSurface::Passive
        );
        assert!(view.dialogs.lock().unwrap().is_empty());
        assert_eq!(f.sink.posted().len(), 1);
    }

    #[test]
    fn test_error_with_focused_view_is_modal_only() {
        let f = fixture();
        let view = Arc::new(FakeStatusView::default());
        view.focused.store(true, Ordering::SeqCst);
        f.fanout.register(ObserverRole::Status, &view);

        assert_eq!(
            f.presenter.on_error(ErrorKind::RootAccessDenied),
            ErrorSurface::Modal(Dialog::RootAccess)
        );
        assert_eq!(
            f.presenter.on_error(ErrorKind::SupplicantFailure),
            ErrorSurface::Modal(Dialog::Supplicant)
        );
        assert!(view.tabs.lock().unwrap().is_empty());
        assert!(f.sink.records().is_empty());
    }

    #[test]
    fn test_other_error_switches_to_links_tab() {
        let f = fixture();
        let view = Arc::new(FakeStatusView::default());
        view.focused.store(true, Ordering::SeqCst);
        f.fanout.register(ObserverRole::Status, &view);

        assert_eq!(
            f.presenter.on_error(ErrorKind::Other),
            ErrorSurface::Modal(Dialog::Error)
        );
        assert_eq!(*view.tabs.lock().unwrap(), vec![ViewTab::Links]);
        assert_eq!(*view.dialogs.lock().unwrap(), vec![Dialog::Error]);
    }

    #[test]
    fn test_on_stopped_cancels_both_alerts() {
        let f = fixture();
        f.presenter.on_stopped();
        assert_eq!(
            f.sink.records(),
            vec![
                AlertRecord::Cancelled(AlertId::Running),
                AlertRecord::Cancelled(AlertId::Client)
            ]
        );
    }

    #[test]
    fn test_progress_goes_to_status_view() {
        let f = fixture();
        f.presenter.on_progress("ignored without a view");

        let view = Arc::new(FakeStatusView::default());
        f.fanout.register(ObserverRole::Status, &view);
        f.presenter.on_progress("Starting");
        assert_eq!(*view.progress.lock().unwrap(), vec!["Starting".to_string()]);
    }

    #[test]
    fn test_hide_progress_reaches_status_view() {
        let f = fixture();
        f.presenter.hide_progress();

        let view = Arc::new(FakeStatusView::default());
        f.fanout.register(ObserverRole::Status, &view);
        f.presenter.hide_progress();
        assert_eq!(view.hides.load(Ordering::SeqCst), 1);
    }
}
