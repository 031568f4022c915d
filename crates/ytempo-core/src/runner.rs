//! Production job runner: the conversion pipeline wrapped in retry.

use std::sync::Arc;

use crate::deps::ToolPaths;
use crate::pipeline;
use crate::queue::{JobContext, JobRunner};
use crate::retry::{run_with_retry, RetryPolicy};

/// Builds the pipeline-execution callback the queue drives: each invocation
/// runs the full metadata/extract/transcode pipeline for one job, retrying
/// transient failures under the job's admission-time retry ceiling.
pub fn conversion_runner(tools: ToolPaths) -> JobRunner {
    Arc::new(move |ctx: JobContext| {
        let tools = tools.clone();
        Box::pin(async move {
            let policy = RetryPolicy {
                max_retries: ctx.max_retries,
                base_delay: ctx.retry_delay_base,
            };
            let sink = ctx.sink.clone();
            let max_retries = ctx.max_retries;
            let result = run_with_retry(
                &policy,
                ctx.attempt_timeout,
                || pipeline::run_attempt(&tools, &ctx),
                |n| sink.retrying(n, max_retries),
            )
            .await;
            if result.is_err() {
                pipeline::cleanup_job_temps(&ctx.options.output_dir, ctx.id).await;
            }
            result
        })
    })
}
