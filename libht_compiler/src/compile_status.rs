#[derive(Debug, Clone, Default, PartialEq)]
pub enum Stage {
    #[default]
    Opening,
    Ingesting,
    Finished,
}

/// Progress message sent from a compilation thread to whoever drives the UI
#[derive(Debug, Clone, Default)]
pub struct CompileStatus {
    pub progress: f32,
    pub instrument: String,
    pub files_done: usize,
    pub files_total: usize,
    pub stage: Stage,
}

impl CompileStatus {
    pub fn new(instrument: &str, files_done: usize, files_total: usize, stage: Stage) -> Self {
        let progress = if files_total == 0 {
            1.0
        } else {
            files_done as f32 / files_total as f32
        };
        Self {
            progress,
            instrument: instrument.to_string(),
            files_done,
            files_total,
            stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        let status = CompileStatus::new("edx", 1, 4, Stage::Ingesting);
        assert_eq!(status.progress, 0.25);
        let empty = CompileStatus::new("xrd", 0, 0, Stage::Finished);
        assert_eq!(empty.progress, 1.0);
    }
}
