use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::VideoSessionError;
use crate::models::{StepOutcome, TeardownReport, TeardownStep};

/// Handle to the vendor SDK's room client. The SDK does not guarantee its
/// own complete cleanup, so the gatekeeper drives these hooks explicitly.
pub trait SdkClient: Send + Sync {
    fn destroy(&self) -> Result<(), VideoSessionError>;
    fn remove_injected_elements(&self) -> Result<(), VideoSessionError>;
}

/// Strategy for the vendor-socket hack: enumerate and force-close open
/// realtime sockets whose target host matches a vendor domain, and
/// intercept new socket creation so late-opened vendor sockets (the SDK's
/// telemetry channel in particular) are closed almost immediately instead
/// of outliving the page.
pub trait NetworkInterceptor: Send + Sync {
    fn close_matching(&self, domains: &[String]) -> Result<usize, VideoSessionError>;
    fn install(&self, domains: &[String]) -> Result<(), VideoSessionError>;
    fn restore(&self) -> Result<(), VideoSessionError>;
    fn is_installed(&self) -> bool;
}

/// Runs the fixed teardown order on leaving a room: destroy the SDK
/// instance, remove its injected elements, close open vendor sockets,
/// then arm the interceptor for anything the SDK opens afterwards. Each
/// step's failure is logged individually and never blocks later steps.
/// The interceptor stays armed across join/leave cycles and is restored
/// exactly once on final teardown.
pub struct RoomTeardown {
    sdk: Arc<dyn SdkClient>,
    interceptor: Arc<dyn NetworkInterceptor>,
    vendor_domains: Vec<String>,
    restored: AtomicBool,
}

impl RoomTeardown {
    pub fn new(
        sdk: Arc<dyn SdkClient>,
        interceptor: Arc<dyn NetworkInterceptor>,
        vendor_domains: Vec<String>,
    ) -> Self {
        Self {
            sdk,
            interceptor,
            vendor_domains,
            restored: AtomicBool::new(false),
        }
    }

    pub fn leave_room(&self) -> TeardownReport {
        let mut report = TeardownReport::default();

        self.run_step(&mut report, TeardownStep::DestroyInstance, || {
            self.sdk.destroy()
        });
        self.run_step(&mut report, TeardownStep::RemoveInjectedElements, || {
            self.sdk.remove_injected_elements()
        });
        self.run_step(&mut report, TeardownStep::CloseVendorSockets, || {
            self.interceptor
                .close_matching(&self.vendor_domains)
                .map(|closed| {
                    if closed > 0 {
                        info!("Force-closed {} lingering vendor sockets", closed);
                    }
                })
        });

        if self.interceptor.is_installed() {
            report.steps.push(StepOutcome {
                step: TeardownStep::ArmInterceptor,
                ok: true,
                detail: Some("already armed".to_string()),
            });
        } else {
            self.run_step(&mut report, TeardownStep::ArmInterceptor, || {
                self.interceptor.install(&self.vendor_domains)
            });
        }

        report
    }

    /// Leave-room steps plus interceptor restoration. Repeated calls never
    /// restore twice.
    pub fn final_teardown(&self) -> TeardownReport {
        let mut report = self.leave_room();

        if self
            .restored
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.run_step(&mut report, TeardownStep::RestoreInterceptor, || {
                self.interceptor.restore()
            });
        } else {
            report.steps.push(StepOutcome {
                step: TeardownStep::RestoreInterceptor,
                ok: true,
                detail: Some("already restored".to_string()),
            });
        }

        report
    }

    fn run_step<F>(&self, report: &mut TeardownReport, step: TeardownStep, op: F)
    where
        F: FnOnce() -> Result<(), VideoSessionError>,
    {
        match op() {
            Ok(()) => report.steps.push(StepOutcome {
                step,
                ok: true,
                detail: None,
            }),
            Err(e) => {
                warn!("Teardown step {:?} failed: {}", step, e);
                report.steps.push(StepOutcome {
                    step,
                    ok: false,
                    detail: Some(e.to_string()),
                });
            }
        }
    }
}
