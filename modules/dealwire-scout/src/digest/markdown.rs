use std::fmt::Write;

use super::{Digest, DigestEntry};

/// Plain Markdown rendering of a digest.
pub fn render_markdown(digest: &Digest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Deal Digest");
    let _ = writeln!(
        out,
        "\n_{} to {}_",
        digest.period_start.format("%Y-%m-%d"),
        digest.period_end.format("%Y-%m-%d")
    );

    if digest.is_empty {
        let _ = writeln!(out, "\nNo relevant items this period.");
    }

    for section in &digest.sections {
        let _ = writeln!(out, "\n## {}", section.title);
        for group in &section.groups {
            let _ = writeln!(out, "\n### {}", group.label);
            for entry in &group.entries {
                render_entry(&mut out, entry);
            }
        }
    }

    let c = &digest.counts;
    let _ = writeln!(out, "\n---");
    let _ = writeln!(
        out,
        "Run `{}`: {} sources ({} failed), {} collected, {} relevant, {} unique, {} analyzed, {} included.",
        digest.run_id,
        c.sources,
        c.failed_sources,
        c.collected,
        c.relevant,
        c.survivors,
        c.analyzed,
        c.included
    );
    if c.classification_errors + c.fetch_failed + c.analysis_errors > 0 {
        let _ = writeln!(
            out,
            "Skipped or degraded: {} classification errors, {} full-text fetch failures, {} analysis errors.",
            c.classification_errors, c.fetch_failed, c.analysis_errors
        );
    }
    out
}

fn render_entry(out: &mut String, entry: &DigestEntry) {
    let _ = write!(out, "\n- **[{}]({})**", entry.title, entry.url);
    let _ = write!(out, " ({}", entry.source_name);
    if let Some(published) = entry.published_at {
        let _ = write!(out, ", {}", published.format("%b %-d"));
    }
    let _ = writeln!(out, ") · {} · score {}", entry.deal_type, entry.signal_score);
    if !entry.opportunity_flags.is_empty() {
        let flags: Vec<&str> = entry.opportunity_flags.iter().map(|f| f.as_str()).collect();
        let _ = writeln!(out, "  - Flags: {}", flags.join(", "));
    }
    if let Some(why) = &entry.why_it_matters {
        let _ = writeln!(out, "  - {why}");
    }
    if let Some(research) = &entry.carve_out_research {
        let _ = writeln!(
            out,
            "  - Carve-out research ({} confidence, {} separation complexity): {}",
            research.confidence.as_str(),
            research.separation_complexity.as_str(),
            research.deal_summary
        );
        for (label, list) in [
            ("Potential assets", &research.potential_assets),
            ("Risks", &research.risks),
            ("Diligence questions", &research.diligence_questions),
            ("Next steps", &research.next_steps),
        ] {
            if !list.is_empty() {
                let _ = writeln!(out, "    - {label}: {}", list.join("; "));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{DigestCounts, DigestGroup, DigestSectionBlock};
    use crate::inference::{CarveOutResearch, ResearchConfidence, SeparationComplexity};
    use chrono::{TimeZone, Utc};
    use dealwire_common::{DigestSection, OpportunityFlag};
    use std::collections::BTreeSet;

    fn digest(sections: Vec<DigestSectionBlock>) -> Digest {
        let end = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        Digest {
            run_id: "run-7".into(),
            generated_at: end,
            period_start: Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap(),
            period_end: end,
            is_empty: sections.is_empty(),
            sections,
            counts: DigestCounts::default(),
        }
    }

    #[test]
    fn empty_digest_says_so() {
        let md = render_markdown(&digest(Vec::new()));
        assert!(md.contains("2026-03-03 to 2026-03-10"));
        assert!(md.contains("No relevant items this period."));
        assert!(md.contains("Run `run-7`"));
    }

    #[test]
    fn entries_render_with_flags_and_rationale() {
        let entry = DigestEntry {
            item_id: "x".into(),
            title: "Acme sells unit".into(),
            url: "https://w.com/a".into(),
            source_name: "Wire".into(),
            published_at: Some(Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap()),
            deal_type: "Divestiture".into(),
            signal_score: 81,
            opportunity_flags: BTreeSet::from([OpportunityFlag::CarveOutHigh]),
            why_it_matters: Some("Carve-out candidate.".into()),
            flag_override: true,
            carve_out_research: Some(CarveOutResearch {
                deal_summary: "Acme is exiting payments.".into(),
                potential_assets: vec!["Payments unit".into(), "EU book".into()],
                separation_complexity: SeparationComplexity::High,
                risks: vec!["Shared data platform".into()],
                diligence_questions: Vec::new(),
                next_steps: Vec::new(),
                confidence: ResearchConfidence::Medium,
            }),
        };
        let md = render_markdown(&digest(vec![DigestSectionBlock {
            section: DigestSection::Portfolio,
            title: DigestSection::Portfolio.title().into(),
            groups: vec![DigestGroup {
                label: "Acme".into(),
                entries: vec![entry],
            }],
        }]));

        assert!(md.contains("## Portfolio Companies"));
        assert!(md.contains("### Acme"));
        assert!(md.contains("**[Acme sells unit](https://w.com/a)** (Wire, Mar 9)"));
        assert!(md.contains("Flags: carve_out_high"));
        assert!(md.contains("Carve-out candidate."));
        assert!(md.contains(
            "Carve-out research (medium confidence, high separation complexity): Acme is exiting payments."
        ));
        assert!(md.contains("Potential assets: Payments unit; EU book"));
        assert!(md.contains("Risks: Shared data platform"));
        assert!(!md.contains("Next steps"));
    }

    #[test]
    fn footer_reports_degraded_items() {
        let mut d = digest(Vec::new());
        assert!(!render_markdown(&d).contains("Skipped or degraded"));

        d.counts = DigestCounts {
            classification_errors: 2,
            fetch_failed: 1,
            analysis_errors: 3,
            ..DigestCounts::default()
        };
        let md = render_markdown(&d);
        assert!(md.contains(
            "Skipped or degraded: 2 classification errors, 1 full-text fetch failures, 3 analysis errors."
        ));
    }
}
