use refract_driver::{Driver, DriverHandle, DriverResult};
use tracing::debug;

/// Pool of short-lived command buffers used for readbacks, layout
/// transitions and initial-contents traffic.
///
/// `get_next_cmd` hands out a reset buffer (or allocates a new one) and
/// parks it on the pending list; `submit_cmds` submits everything pending in
/// one batch; `flush_q` blocks on queue idle and recycles the submitted
/// buffers.
#[derive(Default)]
pub(crate) struct InternalCmdBuffers {
    free: Vec<DriverHandle>,
    pending: Vec<DriverHandle>,
    submitted: Vec<DriverHandle>,
}

impl InternalCmdBuffers {
    pub fn get_next_cmd<D: Driver>(&mut self, driver: &mut D) -> DriverResult<DriverHandle> {
        let cmd = match self.free.pop() {
            Some(cmd) => {
                driver.reset_command_buffer(cmd)?;
                cmd
            }
            None => {
                let cmd = driver.create_command_buffer()?;
                debug!(handle = cmd.0, "allocated internal command buffer");
                cmd
            }
        };
        self.pending.push(cmd);
        Ok(cmd)
    }

    pub fn submit_cmds<D: Driver>(&mut self, driver: &mut D) -> DriverResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        driver.queue_submit(&self.pending)?;
        self.submitted.append(&mut self.pending);
        Ok(())
    }

    /// Block until the queue drains, then recycle submitted buffers.
    pub fn flush_q<D: Driver>(&mut self, driver: &mut D) -> DriverResult<()> {
        driver.queue_wait_idle()?;
        self.free.append(&mut self.submitted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refract_driver::NullDriver;

    #[test]
    fn buffers_recycle_through_the_pool() {
        let mut driver = NullDriver::new();
        let mut pool = InternalCmdBuffers::default();

        let a = pool.get_next_cmd(&mut driver).unwrap();
        driver.begin_command_buffer(a).unwrap();
        driver.end_command_buffer(a).unwrap();
        pool.submit_cmds(&mut driver).unwrap();
        pool.flush_q(&mut driver).unwrap();

        // the freed buffer comes back instead of a fresh allocation
        let b = pool.get_next_cmd(&mut driver).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn submit_with_nothing_pending_is_a_no_op() {
        let mut driver = NullDriver::new();
        let mut pool = InternalCmdBuffers::default();
        pool.submit_cmds(&mut driver).unwrap();
        assert!(driver.submissions.is_empty());
    }
}
