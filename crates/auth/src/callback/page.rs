// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-facing pages served on the callback path.

use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Seconds before the success page closes its own tab.
pub const AUTO_CLOSE_SECS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Success,
    Denied,
    ProviderError,
    /// Missing or wrong CSRF state. Deliberately says nothing about why.
    InvalidRequest,
    /// Valid state but neither a code nor an error.
    MissingCode,
    AlreadyCompleted,
}

impl Page {
    pub fn title(self) -> &'static str {
        match self {
            Self::Success => "Authentication successful",
            Self::Denied => "Authorization denied",
            Self::ProviderError => "Authentication failed",
            Self::InvalidRequest => "Invalid request",
            Self::MissingCode => "Authentication incomplete",
            Self::AlreadyCompleted => "Already completed",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Success => "mailcal can now access your mail and calendar. You can close this window.",
            Self::Denied => "Access was not granted. Return to mailcal to try again.",
            Self::ProviderError => {
                "The identity provider reported an error. Return to mailcal for details."
            }
            Self::InvalidRequest => "This sign-in link is not valid for the current login attempt.",
            Self::MissingCode => "The response did not include an authorization code.",
            Self::AlreadyCompleted => {
                "This login attempt has already finished. You can close this window."
            }
        }
    }

    pub fn render(self) -> String {
        let script = match self {
            Self::Success => format!(
                "<script>setTimeout(function () {{ window.close(); }}, {});</script>",
                AUTO_CLOSE_SECS * 1000
            ),
            _ => String::new(),
        };
        let footer = match self {
            Self::Success => {
                format!("<p><small>This window will close in {AUTO_CLOSE_SECS} seconds.</small></p>")
            }
            _ => String::new(),
        };
        format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
             <body><h1>{title}</h1><p>{message}</p>{footer}{script}</body></html>\n",
            title = self.title(),
            message = self.message(),
        )
    }
}

impl IntoResponse for Page {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "text/html; charset=utf-8"),
                (CACHE_CONTROL, "no-store"),
                (CONNECTION, "close"),
            ],
            self.render(),
        )
            .into_response()
    }
}
