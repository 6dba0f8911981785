//! Air quality index from gas resistance and humidity
//!
//! Higher gas resistance means cleaner air. The score mixes how far the gas
//! reading is below its burn-in baseline with how far humidity is from the
//! configured ideal, weighted by `hum_weighting`. The result is a percentage,
//! 100 being best.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirQuality {
    pub gas_baseline: f64,
    pub hum_baseline: f64,
    /// Share of the score taken by humidity, 0.0 to 1.0
    pub hum_weighting: f64,
}

impl AirQuality {
    pub fn score(&self, gas: f64, humidity: f64) -> f64 {
        let hum_share = self.hum_weighting * 100.0;
        let gas_share = 100.0 - hum_share;

        let hum_offset = humidity - self.hum_baseline;
        let hum_score = if hum_offset > 0.0 {
            (100.0 - self.hum_baseline - hum_offset) / (100.0 - self.hum_baseline) * hum_share
        } else {
            (self.hum_baseline + hum_offset) / self.hum_baseline * hum_share
        };

        let gas_score = if self.gas_baseline - gas > 0.0 {
            gas / self.gas_baseline * gas_share
        } else {
            gas_share
        };

        (hum_score + gas_score).clamp(0.0, 100.0)
    }
}
