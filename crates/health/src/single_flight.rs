use std::sync::{Arc, Mutex, PoisonError};

/// Lets at most one holder run at a time across the process.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<Mutex<bool>>,
}

impl SingleFlight {
    /// Takes the flight if nobody holds it. The flight is released when the
    /// returned guard is dropped.
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);

        if *running {
            return None;
        }

        *running = true;

        Some(FlightGuard {
            running: self.running.clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct FlightGuard {
    running: Arc<Mutex<bool>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}
