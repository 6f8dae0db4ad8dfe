use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use video_cell::{
    NetworkInterceptor, RoomTeardown, SdkClient, TeardownStep, VideoSessionError,
};

/// Shared call log so ordering across both fakes is observable.
#[derive(Default)]
struct CallLog(Mutex<Vec<&'static str>>);

impl CallLog {
    fn record(&self, call: &'static str) {
        self.0.lock().push(call);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }
}

struct FakeSdk {
    log: Arc<CallLog>,
    fail_destroy: bool,
}

impl SdkClient for FakeSdk {
    fn destroy(&self) -> Result<(), VideoSessionError> {
        self.log.record("destroy");
        if self.fail_destroy {
            return Err(VideoSessionError::Cleanup("sdk refused".to_string()));
        }
        Ok(())
    }

    fn remove_injected_elements(&self) -> Result<(), VideoSessionError> {
        self.log.record("remove_elements");
        Ok(())
    }
}

struct FakeInterceptor {
    log: Arc<CallLog>,
    installed: AtomicBool,
    restores: AtomicUsize,
    open_sockets: AtomicUsize,
}

impl FakeInterceptor {
    fn new(log: Arc<CallLog>, open_sockets: usize) -> Self {
        Self {
            log,
            installed: AtomicBool::new(false),
            restores: AtomicUsize::new(0),
            open_sockets: AtomicUsize::new(open_sockets),
        }
    }
}

impl NetworkInterceptor for FakeInterceptor {
    fn close_matching(&self, domains: &[String]) -> Result<usize, VideoSessionError> {
        self.log.record("close_matching");
        assert!(domains.contains(&"zegocloud.com".to_string()));
        Ok(self.open_sockets.swap(0, Ordering::SeqCst))
    }

    fn install(&self, _domains: &[String]) -> Result<(), VideoSessionError> {
        self.log.record("install");
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn restore(&self) -> Result<(), VideoSessionError> {
        self.log.record("restore");
        self.installed.store(false, Ordering::SeqCst);
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }
}

fn domains() -> Vec<String> {
    vec!["zegocloud.com".to_string(), "zego.im".to_string()]
}

fn teardown_with(
    fail_destroy: bool,
    open_sockets: usize,
) -> (RoomTeardown, Arc<CallLog>, Arc<FakeInterceptor>) {
    let log = Arc::new(CallLog::default());
    let sdk = Arc::new(FakeSdk {
        log: log.clone(),
        fail_destroy,
    });
    let interceptor = Arc::new(FakeInterceptor::new(log.clone(), open_sockets));
    let teardown = RoomTeardown::new(sdk, interceptor.clone(), domains());
    (teardown, log, interceptor)
}

#[test]
fn leave_room_runs_steps_in_order() {
    let (teardown, log, _interceptor) = teardown_with(false, 2);

    let report = teardown.leave_room();

    assert!(report.succeeded());
    assert_eq!(
        log.calls(),
        vec!["destroy", "remove_elements", "close_matching", "install"]
    );
}

#[test]
fn instance_is_destroyed_before_the_interceptor_arms() {
    let (teardown, log, _interceptor) = teardown_with(false, 0);

    teardown.leave_room();

    let calls = log.calls();
    let destroy = calls.iter().position(|c| *c == "destroy").unwrap();
    let install = calls.iter().position(|c| *c == "install").unwrap();
    assert!(destroy < install);
}

#[test]
fn interceptor_stays_armed_across_leave_cycles() {
    let (teardown, log, interceptor) = teardown_with(false, 1);

    teardown.leave_room();
    let second = teardown.leave_room();

    assert_eq!(log.calls().iter().filter(|c| **c == "install").count(), 1);
    assert!(interceptor.is_installed());
    let arm = second.outcome(TeardownStep::ArmInterceptor).unwrap();
    assert!(arm.ok);
    assert_eq!(arm.detail.as_deref(), Some("already armed"));
}

#[test]
fn failing_step_does_not_block_later_steps() {
    let (teardown, log, _interceptor) = teardown_with(true, 0);

    let report = teardown.leave_room();

    assert!(!report.succeeded());
    let destroy = report.outcome(TeardownStep::DestroyInstance).unwrap();
    assert!(!destroy.ok);
    assert!(destroy.detail.as_deref().unwrap().contains("sdk refused"));
    // Everything after the failure still ran.
    assert_eq!(
        log.calls(),
        vec!["destroy", "remove_elements", "close_matching", "install"]
    );
    assert!(report.outcome(TeardownStep::ArmInterceptor).unwrap().ok);
}

#[test]
fn final_teardown_restores_exactly_once() {
    let (teardown, log, interceptor) = teardown_with(false, 0);

    let first = teardown.final_teardown();
    let second = teardown.final_teardown();

    assert_eq!(interceptor.restores.load(Ordering::SeqCst), 1);
    assert_eq!(log.calls().iter().filter(|c| **c == "restore").count(), 1);
    assert!(first.outcome(TeardownStep::RestoreInterceptor).unwrap().ok);
    let repeat = second.outcome(TeardownStep::RestoreInterceptor).unwrap();
    assert!(repeat.ok);
    assert_eq!(repeat.detail.as_deref(), Some("already restored"));
}

#[test]
fn restore_follows_the_leave_steps() {
    let (teardown, log, _interceptor) = teardown_with(false, 3);

    teardown.final_teardown();

    assert_eq!(
        log.calls(),
        vec!["destroy", "remove_elements", "close_matching", "install", "restore"]
    );
}
