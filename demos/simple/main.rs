use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use plugflow::{
    EngineBuilder, ExecutionRequest, Result, Workflow, WorkflowModel,
    exporter::Exporter,
    status::{GroupStatus, JobStatus},
    store::{MemDumpSource, MemWorkflowProvider},
    workflow::node::ExporterKind,
};
use serde_json::{Value, json};
use tokio_stream::StreamExt;

struct PrintExporter;

#[async_trait]
impl Exporter for PrintExporter {
    async fn export(
        &self,
        data: &Value,
        object_path: &str,
        _options: &Value,
    ) -> Result<()> {
        println!("export {} -> {}", data, object_path);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let model = WorkflowModel::from_json(include_str!("./workflow.json"))?;

    let dumps = MemDumpSource::new();
    dumps.insert("traj-1", (1..=4).map(|i| json!({"timestep": i * 1000})).collect());
    let workflows = MemWorkflowProvider::new();
    workflows.deploy("frame-counter", model.clone());

    let queue = EngineBuilder::new()
        .dump_source(Arc::new(dumps))
        .workflow_provider(Arc::new(workflows))
        .exporter(ExporterKind::ChartExporter, Arc::new(PrintExporter))
        .build_queue()?;

    let mut updates = Box::pin(queue.status().subscribe("*")?);
    tokio::spawn(async move {
        while let Some(record) = updates.next().await {
            println!("[{}] {} {:.0}%", record.status, record.job_id, record.progress);
        }
    });

    let mut request = ExecutionRequest::new(Arc::new(Workflow::try_from(&model)?));
    request.plugin_id = "frame-counter".to_string();
    request.plugin_slug = "frame-counter".to_string();
    request.trajectory_id = "traj-1".to_string();
    request.team_id = "team-1".to_string();
    request.analysis_id = "analysis-1".to_string();

    let jobs = queue.schedule_analysis(&request).await?;
    println!("scheduled {} jobs", jobs.len());
    queue.start()?;

    loop {
        let groups = queue.status().get_grouped_jobs_for_team("team-1").await?;
        if let Some(group) = groups.first()
            && !matches!(group.overall_status, GroupStatus::Running | GroupStatus::Queued)
        {
            println!("{}", serde_json::to_string_pretty(group)?);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for job in jobs {
        if let Some(record) = queue.status().get_status("analysis", &job.job_id).await?
            && record.status == JobStatus::Completed
        {
            println!("job {} result: {}", job.job_id, record.result.unwrap_or_default());
        }
    }

    queue.stop();
    Ok(())
}
