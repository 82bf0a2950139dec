// This file is part of Gascope.
//
// Gascope is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Gascope is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Gascope.
// If not, see https://www.gnu.org/licenses/.

//! Logging extensions for results

use std::fmt::{Debug, Display};

use tracing::Level;

/// Log the error of a result at a chosen level and pass the result through unchanged.
///
/// Used where a failure is tolerated, e.g. a persistence step that must not fail the
/// operation it belongs to.
pub trait LogOnError: Sized {
    /// Log the error, if any, at `ERROR`
    fn log_on_error<C: Display>(self, context: C) -> Self {
        self.log_on_error_level(Level::ERROR, context)
    }

    /// Log the error, if any, at `level`
    fn log_on_error_level<C: Display>(self, level: Level, context: C) -> Self;
}

impl<T, E: Debug> LogOnError for Result<T, E> {
    fn log_on_error_level<C: Display>(self, level: Level, context: C) -> Self {
        if let Err(error) = &self {
            match level {
                Level::TRACE => tracing::trace!(?error, "{context}"),
                Level::DEBUG => tracing::debug!(?error, "{context}"),
                Level::INFO => tracing::info!(?error, "{context}"),
                Level::WARN => tracing::warn!(?error, "{context}"),
                Level::ERROR => tracing::error!(?error, "{context}"),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_passes_through() {
        let ok: Result<u32, String> = Ok(1);
        assert_eq!(ok.log_on_error("unused"), Ok(1));

        let err: Result<u32, String> = Err("boom".to_string());
        assert_eq!(
            err.log_on_error_level(Level::WARN, "tolerated"),
            Err("boom".to_string())
        );
    }
}
