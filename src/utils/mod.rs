use log::info;

pub fn setup_logging() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;
    info!("Logging initialized.");
    Ok(())
}

/// Zeroes NaN and infinite values. Exchange payloads and divisions by tiny
/// rates produce these now and then, and a zero simply cancels the trade.
pub fn sanitize(value: f64) -> f64 {
    if value.is_nan() || value.is_infinite() {
        0.0
    } else {
        value
    }
}

/// Percentage change going from one rate to another.
pub fn percentage_change(from: f64, to: f64) -> f64 {
    sanitize((to - from) / from * 100.0)
}

/// Seconds since the Unix epoch.
pub fn epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Formats a rate or quantity the way the logbook expects it.
pub fn float2string(value: f64) -> String {
    format!("{:.8}", value)
}

/// Shorter form for percentages in feedback lines.
pub fn float2visual(value: f64) -> String {
    format!("{:.2}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn sanitize_zeroes_non_finite_values() {
        assert_eq!(sanitize(f64::NAN), 0.0);
        assert_eq!(sanitize(f64::INFINITY), 0.0);
        assert_eq!(sanitize(f64::NEG_INFINITY), 0.0);
        assert_eq!(sanitize(1.5), 1.5);
    }

    #[test]
    fn percentage_change_handles_zero_base() {
        assert_approx_eq!(percentage_change(100.0, 102.0), 2.0);
        assert_approx_eq!(percentage_change(100.0, 95.0), -5.0);
        // Division by zero must not leak inf into trade decisions.
        assert_eq!(percentage_change(0.0, 50.0), 0.0);
    }

    #[test]
    fn logging_initializes_once() {
        assert!(setup_logging().is_ok());
        // The global dispatcher is already set; a second call must fail
        // rather than silently replace it.
        assert!(setup_logging().is_err());
    }
}
