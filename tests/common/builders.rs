//! Test data builders for frames the core sends

pub const BOOT_BANNER: &str = "rst:0x1 (POWERON_RESET),boot:0x16 (SPI_FAST_FLASH_BOOT)";

/// Builder for `Data` frames
pub struct DataFrame {
    pressure: f64,
    flow: f64,
    weight: f64,
    temperature: f64,
    status: String,
    state: String,
    profile: String,
}

impl DataFrame {
    pub fn new(status: &str) -> Self {
        Self {
            pressure: 0.0,
            flow: 0.0,
            weight: 0.0,
            temperature: 93.0,
            status: status.to_string(),
            state: "idle".to_string(),
            profile: "none".to_string(),
        }
    }

    pub fn brewing(mut self, profile: &str) -> Self {
        self.state = "brewing".to_string();
        self.profile = profile.to_string();
        self
    }

    /// Profile name only; the firmware state token stays `idle`
    pub fn profile(mut self, profile: &str) -> Self {
        self.profile = profile.to_string();
        self
    }

    pub fn pressure(mut self, pressure: f64) -> Self {
        self.pressure = pressure;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Frame text without terminator
    pub fn text(&self) -> String {
        format!(
            "Data,{},{},{},{},{},{},{},0",
            self.pressure,
            self.flow,
            self.weight,
            self.temperature,
            self.status,
            self.state,
            self.profile
        )
    }

    /// Frame as sent on the wire
    pub fn line(&self) -> String {
        format!("{}\r\n", self.text())
    }
}

/// `ESPInfo` frame with a placeholder identity
pub fn info_frame(firmware: &str) -> String {
    format!("ESPInfo,{firmware},4,NOT_ASSIGNED,NOT_ASSIGNED,NOT_ASSIGNED,NOT_ASSIGNED")
}

/// `ESPInfo` frame with a complete identity
pub fn info_frame_with_identity(firmware: &str, serial: &str) -> String {
    format!("ESPInfo,{firmware},4,black,{serial},12,2024-03-01")
}

pub fn notify_frame(kind: &str, text: &str) -> String {
    format!("Notify,{kind},{text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_frame_builder() {
        let frame = DataFrame::new("Infusion").brewing("Italian").pressure(9.0);
        assert_eq!(frame.text(), "Data,9,0,0,93,Infusion,brewing,Italian,0");
        assert!(frame.line().ends_with("\r\n"));
    }
}
