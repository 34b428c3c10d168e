//! Chat render stage.

use async_trait::async_trait;
use tracing::info;

use super::command::{run_command, substitute};
use super::{StageError, StageExecutor, StageResult};
use crate::pipeline::context::StageContext;
use crate::queue::Stage;

/// Renders the downloaded chat JSON to a video overlay file.
///
/// Template receives `{input}` and `{output}`. A partially written render
/// cannot be validated, so the stage is not resumable: a crash mid-render
/// surfaces as FAILED and the operator retries from a clean slate.
pub struct ChatRenderExecutor {
    command_template: String,
}

impl ChatRenderExecutor {
    pub fn new(command_template: String) -> Self {
        Self { command_template }
    }
}

#[async_trait]
impl StageExecutor for ChatRenderExecutor {
    fn stage(&self) -> Stage {
        Stage::ChatRender
    }

    fn resumable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &StageContext) -> StageResult {
        let input = ctx.layout.chat_json_temp();
        if !input.exists() {
            return Err(StageError::Failed(format!(
                "chat JSON missing at {}",
                input.display()
            )));
        }
        let output = ctx.layout.chat_render_temp();

        let command = substitute(
            &self.command_template,
            &[
                ("input", &input.to_string_lossy()),
                ("output", &output.to_string_lossy()),
            ],
        );
        run_command(&command, &ctx.layout.log_path(self.stage()), &ctx.cancellation).await?;

        info!(vod_id = %ctx.item.vod_id, path = %output.display(), "chat rendered");
        Ok(())
    }
}
