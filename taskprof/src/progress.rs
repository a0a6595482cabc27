//! Terminal progress display, as an explicit handle rather than global
//! state so each phase can be driven independently (and silenced in tests).

use std::io::{self, Write};

pub struct Progress {
    enabled: bool,
    total: u64,
    current: u64,
    last_percent: u64,
}

impl Progress {
    pub fn new(enabled: bool) -> Progress {
        Progress {
            enabled,
            total: 0,
            current: 0,
            last_percent: 0,
        }
    }

    /// No-op handle, for callers that do not want a display.
    pub fn disabled() -> Progress {
        Progress::new(false)
    }

    pub fn begin(&mut self, label: &str, total: u64) {
        self.total = total.max(1);
        self.current = 0;
        self.last_percent = u64::MAX;
        if self.enabled {
            eprint!("{label} ...   0%");
            let _ = io::stderr().flush();
        }
    }

    pub fn update(&mut self) {
        self.current += 1;
        if !self.enabled {
            return;
        }
        let percent = (100 * self.current / self.total).min(100);
        if percent != self.last_percent {
            self.last_percent = percent;
            eprint!("\x08\x08\x08\x08{percent:>3}%");
            let _ = io::stderr().flush();
        }
    }

    pub fn finish(&mut self) {
        if self.enabled {
            eprintln!("\x08\x08\x08\x08100%");
        }
    }
}
