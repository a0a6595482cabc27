//! Human-readable dumps: the repaired record log and the blocked-tasks
//! deltas. Both are opt-in through `--records`.

use std::fs::File;
use std::io::{BufWriter, Write};

use log::info;

use crate::config::Config;
use crate::pass::{Env, Pass};

pub struct RecordsPass {
    enabled: bool,
}

impl RecordsPass {
    pub fn new() -> RecordsPass {
        RecordsPass { enabled: false }
    }
}

impl Default for RecordsPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for RecordsPass {
    fn name(&self) -> &'static str {
        "records"
    }

    fn on_start(&mut self, config: &Config) {
        self.enabled = config.records;
    }

    fn on_end(&mut self, env: &mut Env, config: &Config) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let path = config.artifact("-records.txt");
        info!("writing `{}` to disk...", path.display());
        let mut writer = BufWriter::new(File::create(&path)?);
        for (_, records) in env.store.iter() {
            for record in records {
                writeln!(writer, "{record}")?;
            }
        }
        writer.flush()?;

        let path = config.artifact("-blocked.txt");
        info!("writing `{}` to disk...", path.display());
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "pid time delta")?;
        for (pid, replay) in &env.replays {
            for (time, delta) in &replay.state.blocked_deltas {
                writeln!(writer, "{pid} {time} {delta}")?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}
