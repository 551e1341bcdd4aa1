use dealwire_common::PipelineStage;

/// Facts that decide the conditional skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    /// Survivor count once deduplication has run.
    pub survivors: Option<usize>,
    pub research_enabled: bool,
    pub delivery_enabled: bool,
}

/// Stage that follows `current`. Zero survivors jump straight to
/// composition, disabled research goes from curation to composition, and
/// disabled delivery ends the run after persisting.
pub fn next_stage(current: PipelineStage, flow: Flow) -> PipelineStage {
    use PipelineStage::*;
    match current {
        Init => Collecting,
        Collecting => Classifying,
        Classifying => Deduping,
        Deduping if flow.survivors == Some(0) => Composing,
        Deduping => Enriching,
        Enriching => Analyzing,
        Analyzing => Curating,
        Curating if !flow.research_enabled => Composing,
        Curating => Researching,
        Researching => Composing,
        Composing => Persisting,
        Persisting if !flow.delivery_enabled => Done,
        Persisting => Delivering,
        Delivering => Done,
        Done => Done,
        Failed => Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineStage::*;

    fn walk(flow: Flow) -> Vec<PipelineStage> {
        let mut stages = Vec::new();
        let mut stage = Init;
        while stage != Done {
            stage = next_stage(stage, flow);
            stages.push(stage);
        }
        stages
    }

    #[test]
    fn full_path_visits_every_work_stage() {
        let stages = walk(Flow {
            survivors: Some(4),
            research_enabled: true,
            delivery_enabled: true,
        });
        let mut expected = PipelineStage::WORK.to_vec();
        expected.push(Done);
        assert_eq!(stages, expected);
    }

    #[test]
    fn zero_survivors_skip_to_composing() {
        let stages = walk(Flow {
            survivors: Some(0),
            research_enabled: true,
            delivery_enabled: true,
        });
        assert_eq!(
            stages,
            vec![Collecting, Classifying, Deduping, Composing, Persisting, Delivering, Done]
        );
    }

    #[test]
    fn dry_run_ends_after_persisting() {
        let stages = walk(Flow {
            survivors: Some(2),
            research_enabled: true,
            delivery_enabled: false,
        });
        assert_eq!(stages.last(), Some(&Done));
        assert!(!stages.contains(&Delivering));
        assert_eq!(stages[stages.len() - 2], Persisting);
    }

    #[test]
    fn disabled_research_goes_from_curating_to_composing() {
        let stages = walk(Flow {
            survivors: Some(2),
            research_enabled: false,
            delivery_enabled: true,
        });
        assert!(!stages.contains(&Researching));
        let curating = stages.iter().position(|s| *s == Curating).unwrap();
        assert_eq!(stages[curating + 1], Composing);
    }

    #[test]
    fn stages_always_move_forward() {
        for stage in PipelineStage::WORK {
            for survivors in [Some(0), Some(3)] {
                for research_enabled in [true, false] {
                    for delivery_enabled in [true, false] {
                        let flow = Flow {
                            survivors,
                            research_enabled,
                            delivery_enabled,
                        };
                        assert!(next_stage(stage, flow).ordinal() > stage.ordinal());
                    }
                }
            }
        }
    }
}
