use std::fs;

use tracing::debug;

use crate::context::BuildContext;
use crate::error::StageError;
use crate::stage::{Stage, StageFlow};

use super::PREPARE_OUTPUT;

/// Creates the output and work directories.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrepareOutput;

impl Stage for PrepareOutput {
    fn name(&self) -> &str {
        PREPARE_OUTPUT
    }

    fn run(&self, ctx: &mut BuildContext) -> Result<StageFlow, StageError> {
        for dir in [&ctx.settings.output_dir, &ctx.settings.work_dir] {
            fs::create_dir_all(dir).map_err(|e| StageError::io(dir.as_path(), e))?;
            debug!(dir = %dir.display(), "prepared directory");
        }
        Ok(StageFlow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BuildSettings;
    use docb_types::BuildId;

    #[test]
    fn creates_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = BuildSettings {
            output_dir: tmp.path().join("out/site"),
            work_dir: tmp.path().join("work/checkouts"),
            ..Default::default()
        };
        let mut ctx = BuildContext::new(BuildId::new("b"), settings, Vec::new());
        assert_eq!(PrepareOutput.run(&mut ctx).unwrap(), StageFlow::Continue);
        assert!(tmp.path().join("out/site").is_dir());
        assert!(tmp.path().join("work/checkouts").is_dir());
        // Idempotent.
        PrepareOutput.run(&mut ctx).unwrap();
    }

    #[test]
    fn unwritable_location_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let settings = BuildSettings {
            output_dir: blocker.join("out"),
            work_dir: tmp.path().join("work"),
            ..Default::default()
        };
        let mut ctx = BuildContext::new(BuildId::new("b"), settings, Vec::new());
        assert!(matches!(
            PrepareOutput.run(&mut ctx),
            Err(StageError::Io { .. })
        ));
    }
}
