/// A pan/tilt request, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanTiltCommand {
    pub pan: f64,
    pub tilt: f64,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PanParseError {
    #[error("expected /pan?pan=<number>&tilt=<number>")]
    Pattern,
    #[error("'{0}' is not a finite number")]
    Number(String),
}

impl PanTiltCommand {
    /// Parse a request target of exactly `/pan?pan=<a>&tilt=<b>`.
    ///
    /// `<a>` runs up to the last `&tilt=`, so no other parameter order or
    /// extra parameters are accepted (they end up inside a value and fail the
    /// number parse). Values are not percent-decoded.
    pub fn parse(path: &str, query: Option<&str>) -> Result<Self, PanParseError> {
        if path != "/pan" {
            return Err(PanParseError::Pattern);
        }
        let (pan, tilt) = query
            .and_then(|q| q.strip_prefix("pan="))
            .and_then(|rest| rest.rsplit_once("&tilt="))
            .ok_or(PanParseError::Pattern)?;

        Ok(Self {
            pan: parse_angle(pan)?,
            tilt: parse_angle(tilt)?,
        })
    }

    /// Apply pan range normalization; tilt passes through untouched.
    pub fn normalized(self) -> Self {
        Self {
            pan: normalize_pan(self.pan),
            tilt: self.tilt,
        }
    }

    /// Acknowledgement page echoing the applied values.
    pub fn ack_html(&self) -> String {
        format!(
            "<html><body>Pan: {:?}<br>Tilt: {:?}</body></html>",
            self.pan, self.tilt
        )
    }
}

fn parse_angle(raw: &str) -> Result<f64, PanParseError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| PanParseError::Number(raw.to_string()))
}

/// Wrap angles past 180 into the negative half, then pull anything outside
/// ±90 back to ±85. The clamp targets are deliberately inside the limit.
pub fn normalize_pan(pan: f64) -> f64 {
    let mut pan = pan;
    if pan > 180.0 {
        pan -= 360.0;
    }
    if pan < -90.0 {
        pan = -85.0;
    }
    if pan > 90.0 {
        pan = 85.0;
    }
    pan
}
