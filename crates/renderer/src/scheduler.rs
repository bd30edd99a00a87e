//! Frame scheduling over a fixed ring of frame slots.
//!
//! [`FrameScheduler`] owns the policy of the frame loop: which slot is in use,
//! when the swapchain gets rebuilt, and in which order the per-frame steps
//! run. The GPU work behind each step sits behind [`FrameBackend`], so the
//! ordering can be checked without a device.
//!
//! One call to [`FrameScheduler::draw_frame`] performs:
//!
//! 1. wait for the slot's fence, so the slot's previous submission is done
//! 2. acquire a swapchain image; on out-of-date, rebuild and return without
//!    touching the slot (its fence stays signalled)
//! 3. write the slot's uniforms
//! 4. reset and record the slot's command buffer
//! 5. reset the fence and submit
//! 6. present; rebuild if present was out of date or suboptimal, or a resize
//!    is pending
//! 7. advance to the next slot
//!
//! The fence is only reset once a submission that signals it is about to
//! go out. If any step between acquire and submit fails, the slot is handed
//! to [`FrameBackend::recover_slot`] so the next wait on it cannot hang.

use ash::vk;
use glam::Vec2;
use tracing::{debug, error, trace, warn};

use renderer_rhi::swapchain::{AcquireOutcome, PresentOutcome};

use crate::error::RendererResult;

/// Inputs a frame consumes from the application.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInput {
    /// Seconds since engine start.
    pub time_seconds: f32,
    /// Cursor position in window pixels.
    pub cursor: Vec2,
}

/// GPU operations the scheduler drives, one slot at a time.
pub trait FrameBackend {
    /// Blocks until the slot's previous submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()>;

    /// Acquires the next swapchain image, signalling the slot's acquire semaphore.
    fn acquire(&mut self, slot: usize) -> RendererResult<AcquireOutcome>;

    fn write_uniforms(&mut self, slot: usize, input: &FrameInput) -> RendererResult<()>;

    /// Returns the slot's fence to the unsignalled state.
    fn reset_fence(&mut self, slot: usize) -> RendererResult<()>;

    /// Resets the slot's command buffer and records both passes into it.
    fn record(&mut self, slot: usize, image_index: u32) -> RendererResult<()>;

    fn submit(&mut self, slot: usize) -> RendererResult<()>;

    /// Returns a slot to a usable state after a failed frame: fence signalled,
    /// semaphores unsignalled.
    ///
    /// Called when a step after a successful acquire fails.
    fn recover_slot(&mut self, slot: usize) -> RendererResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<PresentOutcome>;

    /// Rebuilds the swapchain and everything sized by it.
    ///
    /// Only called with a non-zero extent.
    fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()>;
}

/// Outcome of one [`FrameScheduler::draw_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented.
    Presented {
        /// The swapchain was rebuilt after presenting.
        rebuilt: bool,
    },
    /// Acquire reported out-of-date; the swapchain was rebuilt and nothing drawn.
    OutOfDate,
    /// The framebuffer has zero area; nothing was done.
    Minimized,
}

/// Latest requested framebuffer size, coalescing repeated notifications.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResizeRequest {
    pending: Option<vk::Extent2D>,
}

impl ResizeRequest {
    /// Records a new size. Only the most recent request survives.
    pub fn request(&mut self, width: u32, height: u32) {
        self.pending = Some(vk::Extent2D { width, height });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// True if the pending size has no area.
    pub fn is_zero_area(&self) -> bool {
        self.pending
            .is_some_and(|extent| extent.width == 0 || extent.height == 0)
    }

    /// Takes the pending size if it can be rendered to.
    ///
    /// A zero-area request stays pending.
    pub fn take_drawable(&mut self) -> Option<vk::Extent2D> {
        if self.is_zero_area() {
            return None;
        }
        self.pending.take()
    }
}

/// Drives frames over `slot_count` frame slots.
#[derive(Debug)]
pub struct FrameScheduler {
    slot_count: usize,
    current_slot: usize,
    framebuffer: vk::Extent2D,
    resize: ResizeRequest,
    frames_presented: u64,
    rebuilds: u64,
}

impl FrameScheduler {
    /// Creates a scheduler for `slot_count` slots (at least one) and the
    /// framebuffer size the swapchain was first built for.
    pub fn new(slot_count: usize, framebuffer: vk::Extent2D) -> Self {
        Self {
            slot_count: slot_count.max(1),
            current_slot: 0,
            framebuffer,
            resize: ResizeRequest::default(),
            frames_presented: 0,
            rebuilds: 0,
        }
    }

    /// Notes a new framebuffer size. The rebuild happens after the next present.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        debug!("Resize requested: {}x{}", width, height);
        self.resize.request(width, height);
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Size the swapchain was last built for.
    #[inline]
    pub fn framebuffer_extent(&self) -> vk::Extent2D {
        self.framebuffer
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    #[inline]
    pub fn resize_pending(&self) -> bool {
        self.resize.is_pending()
    }

    /// Runs one frame against `backend`.
    ///
    /// # Errors
    ///
    /// Any backend error aborts the frame and is returned unchanged. The slot
    /// does not advance in that case. A failure after acquire also recovers
    /// the slot before returning.
    pub fn draw_frame<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        input: &FrameInput,
    ) -> RendererResult<FrameStatus> {
        if self.resize.is_zero_area() {
            trace!("Framebuffer has zero area, skipping frame");
            return Ok(FrameStatus::Minimized);
        }

        let slot = self.current_slot;
        backend.wait_for_slot(slot)?;

        let image_index = match backend.acquire(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    trace!("Acquired image {} from a suboptimal swapchain", image_index);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire, rebuilding");
                self.rebuild(backend)?;
                return Ok(FrameStatus::OutOfDate);
            }
        };

        if let Err(err) = submit_slot(backend, slot, image_index, input) {
            warn!("Frame on slot {} failed before present: {}", slot, err);
            if let Err(recover_err) = backend.recover_slot(slot) {
                error!("Failed to recover slot {}: {}", slot, recover_err);
            }
            return Err(err);
        }

        let outcome = backend.present(slot, image_index)?;
        let rebuilt = if outcome.needs_rebuild() || self.resize.is_pending() {
            debug!("Rebuilding after present ({:?})", outcome);
            self.rebuild(backend)?
        } else {
            false
        };

        self.current_slot = (slot + 1) % self.slot_count;
        self.frames_presented += 1;
        Ok(FrameStatus::Presented { rebuilt })
    }

    /// Rebuilds at the pending size, or at the current size if none is pending.
    ///
    /// Returns false without touching the backend while the pending size has no area.
    fn rebuild<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> RendererResult<bool> {
        if self.resize.is_zero_area() {
            return Ok(false);
        }
        if let Some(extent) = self.resize.take_drawable() {
            self.framebuffer = extent;
        }
        backend.rebuild(self.framebuffer)?;
        self.rebuilds += 1;
        Ok(true)
    }
}

/// Steps between acquire and present. The fence reset sits right before
/// the submission that signals it again.
fn submit_slot<B: FrameBackend + ?Sized>(
    backend: &mut B,
    slot: usize,
    image_index: u32,
    input: &FrameInput,
) -> RendererResult<()> {
    backend.write_uniforms(slot, input)?;
    backend.record(slot, image_index)?;
    backend.reset_fence(slot)?;
    backend.submit(slot)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};

    use super::*;
    use crate::error::RendererError;

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        WriteUniforms(usize, f32),
        ResetFence(usize),
        Record(usize, u32),
        Submit(usize),
        Recover(usize),
        Present(usize, u32),
        Rebuild(u32, u32),
    }

    /// Records calls and replays scripted acquire/present results.
    ///
    /// Fences are modelled as signalled unless reset without a successful
    /// submit or recovery since; waiting on such a fence is logged in
    /// `hung_waits` instead of blocking.
    #[derive(Default)]
    struct MockBackend {
        calls: Vec<Call>,
        acquire_results: VecDeque<AcquireOutcome>,
        present_results: VecDeque<PresentOutcome>,
        next_image: u32,
        image_count: u32,
        fail_record: bool,
        fail_submit: bool,
        unsignalled: HashSet<usize>,
        hung_waits: Vec<usize>,
    }

    impl MockBackend {
        fn new(image_count: u32) -> Self {
            Self {
                image_count,
                ..Default::default()
            }
        }

        fn rebuilds(&self) -> Vec<(u32, u32)> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Rebuild(w, h) => Some((*w, *h)),
                    _ => None,
                })
                .collect()
        }

        fn slots_submitted(&self) -> Vec<usize> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Submit(slot) => Some(*slot),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
            self.calls.push(Call::Wait(slot));
            if self.unsignalled.contains(&slot) {
                self.hung_waits.push(slot);
            }
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> RendererResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquire_results.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn write_uniforms(&mut self, slot: usize, input: &FrameInput) -> RendererResult<()> {
            self.calls
                .push(Call::WriteUniforms(slot, input.time_seconds));
            Ok(())
        }

        fn reset_fence(&mut self, slot: usize) -> RendererResult<()> {
            self.calls.push(Call::ResetFence(slot));
            self.unsignalled.insert(slot);
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            if self.fail_record {
                return Err(RendererError::InvalidState("recording failed".to_string()));
            }
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RendererResult<()> {
            self.calls.push(Call::Submit(slot));
            if self.fail_submit {
                return Err(RendererError::InvalidState("device lost".to_string()));
            }
            // Completes immediately.
            self.unsignalled.remove(&slot);
            Ok(())
        }

        fn recover_slot(&mut self, slot: usize) -> RendererResult<()> {
            self.calls.push(Call::Recover(slot));
            self.unsignalled.remove(&slot);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_results
                .pop_front()
                .unwrap_or(PresentOutcome::Optimal))
        }

        fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
            self.calls.push(Call::Rebuild(extent.width, extent.height));
            Ok(())
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn input(time_seconds: f32) -> FrameInput {
        FrameInput {
            time_seconds,
            cursor: Vec2::ZERO,
        }
    }

    #[test]
    fn test_steps_run_in_order() {
        let mut scheduler = FrameScheduler::new(2, extent(1280, 720));
        let mut backend = MockBackend::new(3);

        let status = scheduler.draw_frame(&mut backend, &input(1.5)).unwrap();

        assert_eq!(status, FrameStatus::Presented { rebuilt: false });
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::WriteUniforms(0, 1.5),
                Call::Record(0, 0),
                Call::ResetFence(0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(scheduler.current_slot(), 1);
    }

    #[test]
    fn test_fence_waited_before_reset_every_frame() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);

        for frame in 0..6 {
            scheduler
                .draw_frame(&mut backend, &input(frame as f32))
                .unwrap();
        }

        let mut waited = [false; 2];
        let mut resets = 0;
        for call in &backend.calls {
            match *call {
                Call::Wait(slot) => waited[slot] = true,
                Call::ResetFence(slot) => {
                    assert!(waited[slot], "fence of slot {slot} reset before wait");
                    waited[slot] = false;
                    resets += 1;
                }
                _ => {}
            }
        }
        assert_eq!(resets, 6);
    }

    #[test]
    fn test_slots_wrap_around() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);

        for frame in 0..5 {
            scheduler
                .draw_frame(&mut backend, &input(frame as f32))
                .unwrap();
        }

        assert_eq!(backend.slots_submitted(), vec![0, 1, 0, 1, 0]);
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.frames_presented(), 5);
    }

    #[test]
    fn test_out_of_date_acquire_returns_early_without_advancing() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);
        backend.acquire_results.push_back(AcquireOutcome::OutOfDate);

        let status = scheduler.draw_frame(&mut backend, &input(0.0)).unwrap();

        assert_eq!(status, FrameStatus::OutOfDate);
        assert_eq!(
            backend.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Rebuild(800, 600)]
        );
        assert_eq!(scheduler.current_slot(), 0);
        assert_eq!(scheduler.frames_presented(), 0);

        // The same slot is used for the retry.
        backend.calls.clear();
        scheduler.draw_frame(&mut backend, &input(0.1)).unwrap();
        assert_eq!(backend.calls[0], Call::Wait(0));
        assert_eq!(backend.slots_submitted(), vec![0]);
    }

    #[test]
    fn test_duplicate_resizes_rebuild_once() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);

        scheduler.request_resize(1024, 768);
        scheduler.request_resize(1024, 768);
        let status = scheduler.draw_frame(&mut backend, &input(0.0)).unwrap();
        scheduler.draw_frame(&mut backend, &input(0.1)).unwrap();

        assert_eq!(status, FrameStatus::Presented { rebuilt: true });
        assert_eq!(backend.rebuilds(), vec![(1024, 768)]);
        assert_eq!(scheduler.framebuffer_extent(), extent(1024, 768));
        assert!(!scheduler.resize_pending());
    }

    #[test]
    fn test_resizes_coalesce_to_latest() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);

        scheduler.request_resize(900, 700);
        scheduler.request_resize(1000, 700);
        scheduler.request_resize(1920, 1080);
        scheduler.draw_frame(&mut backend, &input(0.0)).unwrap();

        assert_eq!(backend.rebuilds(), vec![(1920, 1080)]);
    }

    #[test]
    fn test_suboptimal_present_rebuilds_at_current_size() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);
        backend.present_results.push_back(PresentOutcome::Suboptimal);
        backend.present_results.push_back(PresentOutcome::OutOfDate);

        scheduler.draw_frame(&mut backend, &input(0.0)).unwrap();
        scheduler.draw_frame(&mut backend, &input(0.1)).unwrap();
        scheduler.draw_frame(&mut backend, &input(0.2)).unwrap();

        assert_eq!(backend.rebuilds(), vec![(800, 600), (800, 600)]);
        assert_eq!(scheduler.rebuild_count(), 2);
        // Rebuilding after present does not hold back the slot.
        assert_eq!(backend.slots_submitted(), vec![0, 1, 0]);
    }

    #[test]
    fn test_zero_extent_resize_stays_pending() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);

        scheduler.request_resize(0, 0);
        for _ in 0..3 {
            let status = scheduler.draw_frame(&mut backend, &input(0.0)).unwrap();
            assert_eq!(status, FrameStatus::Minimized);
        }
        assert!(backend.calls.is_empty());
        assert!(scheduler.resize_pending());

        scheduler.request_resize(640, 480);
        let status = scheduler.draw_frame(&mut backend, &input(0.0)).unwrap();
        assert_eq!(status, FrameStatus::Presented { rebuilt: true });
        assert_eq!(backend.rebuilds(), vec![(640, 480)]);
    }

    #[test]
    fn test_zero_width_counts_as_minimized() {
        let mut request = ResizeRequest::default();
        request.request(0, 720);
        assert!(request.is_zero_area());
        assert_eq!(request.take_drawable(), None);
        assert!(request.is_pending());

        request.request(1280, 720);
        assert_eq!(request.take_drawable(), Some(extent(1280, 720)));
        assert!(!request.is_pending());
    }

    #[test]
    fn test_backend_error_does_not_advance() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);
        backend.fail_submit = true;

        assert!(scheduler.draw_frame(&mut backend, &input(0.0)).is_err());
        assert_eq!(scheduler.current_slot(), 0);
        assert_eq!(scheduler.frames_presented(), 0);
    }

    #[test]
    fn test_retry_after_failed_submit_does_not_hang() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);
        backend.fail_submit = true;

        assert!(scheduler.draw_frame(&mut backend, &input(0.0)).is_err());
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::WriteUniforms(0, 0.0),
                Call::Record(0, 0),
                Call::ResetFence(0),
                Call::Submit(0),
                Call::Recover(0),
            ]
        );

        backend.fail_submit = false;
        for frame in 1..4 {
            let status = scheduler
                .draw_frame(&mut backend, &input(frame as f32))
                .unwrap();
            assert_eq!(status, FrameStatus::Presented { rebuilt: false });
        }
        assert!(backend.hung_waits.is_empty(), "{:?}", backend.hung_waits);
        assert_eq!(scheduler.frames_presented(), 3);
    }

    #[test]
    fn test_failed_record_leaves_fence_signalled() {
        let mut scheduler = FrameScheduler::new(1, extent(800, 600));
        let mut backend = MockBackend::new(2);
        backend.fail_record = true;

        assert!(scheduler.draw_frame(&mut backend, &input(0.0)).is_err());
        assert!(!backend.calls.contains(&Call::ResetFence(0)));
        assert!(!backend.calls.contains(&Call::Submit(0)));
        assert_eq!(backend.calls.last(), Some(&Call::Recover(0)));

        backend.fail_record = false;
        backend.calls.clear();
        scheduler.draw_frame(&mut backend, &input(0.1)).unwrap();
        assert!(backend.hung_waits.is_empty());
        assert_eq!(backend.slots_submitted(), vec![0]);
    }

    #[test]
    fn test_out_of_date_acquire_does_not_recover() {
        let mut scheduler = FrameScheduler::new(2, extent(800, 600));
        let mut backend = MockBackend::new(3);
        backend.acquire_results.push_back(AcquireOutcome::OutOfDate);

        scheduler.draw_frame(&mut backend, &input(0.0)).unwrap();
        assert!(!backend.calls.iter().any(|c| matches!(c, Call::Recover(_))));
    }

    #[test]
    fn test_single_slot() {
        let mut scheduler = FrameScheduler::new(1, extent(800, 600));
        let mut backend = MockBackend::new(2);

        for _ in 0..3 {
            scheduler.draw_frame(&mut backend, &input(0.0)).unwrap();
        }
        assert_eq!(backend.slots_submitted(), vec![0, 0, 0]);
    }
}
