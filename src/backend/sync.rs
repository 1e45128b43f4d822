// Synchronization primitives
//
// Per-slot fences and semaphores for GPU-CPU and GPU-GPU ordering, plus a
// host-side state machine guarding frame-slot reuse.

use anyhow::{bail, Result};
use ash::vk;
use std::sync::Arc;
use super::RenderDevice;

/// Sync objects for one frame-in-flight slot
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<RenderDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Fence starts signaled so the first wait on the slot passes
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
                in_flight_fence: device.device.create_fence(&fence_info, None)?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Where a frame slot currently is in its record/submit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    RenderPassActive,
    Executable,
    Submitted,
}

/// Host-side tracker for every frame slot.
///
/// A slot's command buffer may only be re-recorded after the submission that
/// last used it was observed complete (its fence wait returned), so every
/// transition is checked and an out-of-order step is an error rather than a
/// silent race.
pub struct SlotTracker {
    states: Vec<SlotState>,
}

impl SlotTracker {
    pub fn new(slots: usize) -> Self {
        Self {
            states: vec![SlotState::Idle; slots],
        }
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// The slot's fence wait returned: the GPU is done with it.
    /// Also legal on a slot that was never submitted (fences start signaled).
    pub fn complete(&mut self, slot: usize) -> Result<()> {
        match self.states[slot] {
            SlotState::Submitted | SlotState::Idle => {
                self.states[slot] = SlotState::Idle;
                Ok(())
            }
            state => bail!("slot {} completed while {:?}", slot, state),
        }
    }

    pub fn begin_recording(&mut self, slot: usize) -> Result<()> {
        self.transition(slot, SlotState::Idle, SlotState::Recording)
    }

    pub fn enter_render_pass(&mut self, slot: usize) -> Result<()> {
        self.transition(slot, SlotState::Recording, SlotState::RenderPassActive)
    }

    pub fn exit_render_pass(&mut self, slot: usize) -> Result<()> {
        self.transition(slot, SlotState::RenderPassActive, SlotState::Recording)
    }

    pub fn finish_recording(&mut self, slot: usize) -> Result<()> {
        self.transition(slot, SlotState::Recording, SlotState::Executable)
    }

    pub fn submit(&mut self, slot: usize) -> Result<()> {
        self.transition(slot, SlotState::Executable, SlotState::Submitted)
    }

    fn transition(&mut self, slot: usize, from: SlotState, to: SlotState) -> Result<()> {
        if self.states[slot] != from {
            bail!(
                "slot {}: expected {:?} before {:?}, found {:?}",
                slot,
                from,
                to,
                self.states[slot]
            );
        }
        self.states[slot] = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_and_submit(tracker: &mut SlotTracker, slot: usize) -> Result<()> {
        tracker.begin_recording(slot)?;
        tracker.enter_render_pass(slot)?;
        tracker.exit_render_pass(slot)?;
        tracker.finish_recording(slot)?;
        tracker.submit(slot)
    }

    #[test]
    fn full_cycle_walks_every_state() {
        let mut tracker = SlotTracker::new(1);
        assert_eq!(tracker.state(0), SlotState::Idle);

        tracker.begin_recording(0).unwrap();
        assert_eq!(tracker.state(0), SlotState::Recording);
        tracker.enter_render_pass(0).unwrap();
        assert_eq!(tracker.state(0), SlotState::RenderPassActive);
        tracker.exit_render_pass(0).unwrap();
        assert_eq!(tracker.state(0), SlotState::Recording);
        tracker.finish_recording(0).unwrap();
        assert_eq!(tracker.state(0), SlotState::Executable);
        tracker.submit(0).unwrap();
        assert_eq!(tracker.state(0), SlotState::Submitted);
        tracker.complete(0).unwrap();
        assert_eq!(tracker.state(0), SlotState::Idle);
    }

    #[test]
    fn slot_cannot_be_rerecorded_before_completion() {
        let mut tracker = SlotTracker::new(2);
        record_and_submit(&mut tracker, 0).unwrap();

        // Still submitted: re-recording must fail
        assert!(tracker.begin_recording(0).is_err());

        // Mock GPU-completion callback (stands in for the fence wait)
        let gpu_complete = |tracker: &mut SlotTracker, slot: usize| tracker.complete(slot);
        gpu_complete(&mut tracker, 0).unwrap();

        assert!(tracker.begin_recording(0).is_ok());
    }

    #[test]
    fn two_slots_interleave_with_fence_waits_first() {
        let mut tracker = SlotTracker::new(2);
        let mut completions: Vec<usize> = Vec::new();

        for frame in 0..6 {
            let slot = frame % 2;
            // Step 1 of the frame protocol: wait on the slot's fence, which
            // here is simulated by the completion callback
            if tracker.state(slot) == SlotState::Submitted {
                tracker.complete(slot).unwrap();
                completions.push(slot);
            }
            record_and_submit(&mut tracker, slot).unwrap();
        }

        // Slots 0 and 1 each completed twice, strictly alternating
        assert_eq!(completions, vec![0, 1, 0, 1]);
    }

    #[test]
    fn complete_on_fresh_slot_is_legal() {
        let mut tracker = SlotTracker::new(1);
        assert!(tracker.complete(0).is_ok());
        assert_eq!(tracker.state(0), SlotState::Idle);
    }

    #[test]
    fn complete_during_recording_is_an_error() {
        let mut tracker = SlotTracker::new(1);
        tracker.begin_recording(0).unwrap();
        assert!(tracker.complete(0).is_err());
    }
}
