//! Live-preview surface with coalescing backpressure.
//!
//! Every parameter change enqueues a re-render. Only the most recent pending
//! request survives — a frame dropped in favor of a later one is expected
//! control flow, not an error — and requests are dispatched after a short
//! debounce window so rapid slider drags do not flood the render queue.
//! While a render is in flight the pending slot keeps being replaced rather
//! than queueing, so there is never a backlog.

use std::{
    sync::{Arc, Condvar, Mutex},
    thread,
    time::Duration,
};

use tracing::{debug, warn};

use crate::{error::HalationResult, image::Image, params::FilterParameters};

/// Debounce between accepting a request and rendering it.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(33);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreviewMetrics {
    pub submitted: u64,
    pub rendered: u64,
    /// Requests replaced by a newer one before they were rendered.
    pub coalesced: u64,
    pub failed: u64,
}

type RenderFn = dyn Fn(&FilterParameters) -> HalationResult<Image> + Send + 'static;
type PresentFn = dyn FnMut(Image) + Send + 'static;

struct State {
    pending: Option<FilterParameters>,
    in_flight: bool,
    shutdown: bool,
    metrics: PreviewMetrics,
}

struct Shared {
    state: Mutex<State>,
    signal: Condvar,
}

pub struct PreviewSurface {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PreviewSurface {
    /// `render` produces the preview frame for a parameter snapshot;
    /// `present` receives each completed frame on the worker thread.
    pub fn new(
        render: impl Fn(&FilterParameters) -> HalationResult<Image> + Send + 'static,
        present: impl FnMut(Image) + Send + 'static,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                pending: None,
                in_flight: false,
                shutdown: false,
                metrics: PreviewMetrics::default(),
            }),
            signal: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("halation-preview".to_string())
            .spawn(move || worker_loop(worker_shared, Box::new(render), Box::new(present)))
            .expect("failed to spawn preview worker");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Request a re-render for the given parameter snapshot. Replaces any
    /// not-yet-started request for this surface.
    pub fn push_frame(&self, params: FilterParameters) {
        let mut state = self.shared.state.lock().unwrap();
        state.metrics.submitted += 1;
        if state.pending.replace(params).is_some() {
            state.metrics.coalesced += 1;
        }
        self.shared.signal.notify_all();
    }

    pub fn metrics(&self) -> PreviewMetrics {
        self.shared.state.lock().unwrap().metrics
    }

    /// Block until no request is pending or rendering, or until `timeout`.
    /// Returns whether the surface went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.pending.is_none() && !state.in_flight {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .shared
                .signal
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
        }
    }
}

impl Drop for PreviewSurface {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.signal.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, render: Box<RenderFn>, mut present: Box<PresentFn>) {
    loop {
        // Wait for a request.
        {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    return;
                }
                if state.pending.is_some() {
                    break;
                }
                state = shared.signal.wait(state).unwrap();
            }
        }

        // Let a drag settle; newer pushes during the window replace the
        // pending snapshot and are rendered instead.
        thread::sleep(DEBOUNCE_WINDOW);

        let params = {
            let mut state = shared.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            let Some(params) = state.pending.take() else {
                continue;
            };
            state.in_flight = true;
            params
        };

        // Present before reporting idle so observers never see an idle
        // surface with the frame still on the way.
        let result = render(&params);
        let presented = match result {
            Ok(image) => {
                debug!("presenting preview frame");
                present(image);
                true
            }
            Err(err) => {
                warn!(%err, "preview render failed");
                false
            }
        };

        let mut state = shared.state.lock().unwrap();
        state.in_flight = false;
        if presented {
            state.metrics.rendered += 1;
        } else {
            state.metrics.failed += 1;
        }
        shared.signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::geom::Extent;

    fn params_with_blur(blur: f32) -> FilterParameters {
        FilterParameters {
            blur_radius: blur,
            ..FilterParameters::default()
        }
    }

    // Encodes the request's blur value into the frame width so tests can
    // identify which snapshot was rendered.
    fn coded_render(params: &FilterParameters) -> HalationResult<Image> {
        thread::sleep(Duration::from_millis(10));
        let width = (params.blur_radius * 100.0).round() as u32 + 1;
        Ok(Image::solid(Extent::new(width, 1), [0, 0, 0, 255]))
    }

    #[test]
    fn rapid_pushes_coalesce_to_the_latest() {
        let presented = Arc::new(Mutex::new(Vec::<u32>::new()));
        let sink = Arc::clone(&presented);
        let surface = PreviewSurface::new(coded_render, move |img| {
            sink.lock().unwrap().push(img.width());
        });

        for i in 0..5 {
            surface.push_frame(params_with_blur(i as f32 / 10.0));
        }
        assert!(surface.wait_idle(Duration::from_secs(5)));

        let metrics = surface.metrics();
        assert_eq!(metrics.submitted, 5);
        assert!(metrics.rendered >= 1);
        assert!(metrics.rendered < 5);
        assert!(metrics.coalesced >= 1);
        assert_eq!(metrics.rendered + metrics.coalesced, metrics.submitted);

        // The last rendered frame corresponds to the last push (blur 0.4).
        let presented = presented.lock().unwrap();
        assert_eq!(*presented.last().unwrap(), 41);
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let calls = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&calls);
        let surface = PreviewSurface::new(
            move |_params| {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(crate::error::HalationError::render("boom"))
            },
            |_img| {},
        );

        surface.push_frame(FilterParameters::default());
        assert!(surface.wait_idle(Duration::from_secs(5)));
        let metrics = surface.metrics();
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.rendered, 0);

        // The surface still accepts and renders follow-up requests.
        surface.push_frame(FilterParameters::default());
        assert!(surface.wait_idle(Duration::from_secs(5)));
        assert_eq!(surface.metrics().failed, 2);
    }

    #[test]
    fn idle_surface_reports_idle() {
        let surface = PreviewSurface::new(coded_render, |_img| {});
        assert!(surface.wait_idle(Duration::from_millis(100)));
        assert_eq!(surface.metrics(), PreviewMetrics::default());
    }
}
