use std::collections::HashMap;
use std::fmt::Write;

use camino::Utf8PathBuf;

use crate::Pipeline;
use crate::executor::TaskExecution;
use crate::task::TaskHandle;

/// Build diagnostics and performance metrics.
///
/// Returned by [`Pipeline::run`], it records how long each executed task
/// took and which files the run wrote.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Execution metrics of every task with a body that ran.
    pub execution_times: HashMap<TaskHandle, TaskExecution>,
    /// Every file written during the run, in completion order.
    pub written: Vec<Utf8PathBuf>,
}

impl Diagnostics {
    /// Renders the task graph as a Mermaid diagram, color-coded by execution duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Blue**: Not executed
    pub fn render_mermaid(&self, pipeline: &Pipeline) -> String {
        let mut f = String::new();
        let _ = self.write_mermaid(pipeline, &mut f);
        f
    }

    fn write_mermaid(&self, pipeline: &Pipeline, f: &mut String) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let times = &self.execution_times;
        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for t in times.values() {
            let secs = t.duration.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            min_time = 0.0;
            max_time = 0.0;
        }

        // all tasks took the same time
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        for index in pipeline.graph.node_indices() {
            let name = pipeline.graph[index].name().replace('"', "\\\"");

            let (label, color) = match times.get(&TaskHandle(index)) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);

                    // 0.0 green, 0.5 yellow, 1.0 red
                    let (r, g) = if t < 0.5 {
                        ((255.0 * t * 2.0) as u8, 255)
                    } else {
                        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
                    };

                    (format!("{:.2?}", exec.duration), format!("#{r:02X}{g:02X}00"))
                }
                None => ("-".to_string(), "#ADD8E6".to_string()),
            };

            writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), name, label)?;
            writeln!(f, "    style {} fill:{}", index.index(), color)?;
        }

        for edge in pipeline.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}
