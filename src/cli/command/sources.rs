use crate::registry::{self, Scenario, Source, SourceKind, Variable};

/// One block per source: code, names, default range and variable mapping.
pub fn sources() -> String {
    let mut lines = Vec::new();

    for kind in SourceKind::ALL {
        // The GCM entries are identical apart from the path segment.
        let source = match kind {
            SourceKind::Era5 => Source::Era5,
            SourceKind::Gcm => Source::Gcm(Scenario::Ssp245),
            SourceKind::Gsod => Source::Gsod,
        };
        let (start, end) = source.default_range();

        lines.push(format!("{} {} ({})", kind.code(), kind.name(), kind.long_name()));
        if kind == SourceKind::Gcm {
            let scenarios: Vec<String> = Scenario::ALL
                .iter()
                .map(|s| format!("{} ({})", s.name(), s.code()))
                .collect();
            lines.push(format!("  scenarios: {}", scenarios.join(", ")));
        }
        lines.push(format!(
            "  default range: {} - {}",
            start.format("%Y-%m-%d %H:00"),
            end.format("%Y-%m-%d %H:00")
        ));
        for variable in Variable::ALL {
            if let Some(binding) = registry::binding(&source, variable) {
                lines.push(format!(
                    "  {:<7} -> {} ({})",
                    variable.name(),
                    binding.download_id,
                    binding.dataset_id
                ));
            }
        }
    }

    lines.join("\n")
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_list_every_source_and_mapping() {
        let text = sources();

        assert!(text.contains("1 ERA5"));
        assert!(text.contains("2 GCM"));
        assert!(text.contains("SSP585 (2)"));
        assert!(text.contains("tmp     -> 2m_temperature (t2m)"));
        assert!(text.contains("precip  -> PRCP (PRCP)"));
        assert!(text.contains("default range: 1979-01-01 00:00 - 2015-01-01 23:00"));
    }
}
