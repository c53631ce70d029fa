use rand::Rng;
use serde::Serialize;

/// One reading in the sensor firmware's UART format.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub device_id: String,
    pub temp_c: f64,
    pub humidity: f64,
}

impl Reading {
    /// Renders the reading as one newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// DHT-style readings: tenths of a degree and of a percent.
pub fn generate_reading(rng: &mut impl Rng, device_id: &str) -> Reading {
    let temp_c = if rng.gen_bool(0.05) {
        rng.gen_range(0.0..50.0) // 5% outliers
    } else {
        rng.gen_range(22.0..32.0) // Normal range
    };

    let humidity = if rng.gen_bool(0.05) {
        rng.gen_range(20.0..95.0) // 5% outliers
    } else {
        rng.gen_range(40.0..85.0) // Normal range
    };

    Reading {
        device_id: device_id.to_string(),
        temp_c: tenths(temp_c),
        humidity: tenths(humidity),
    }
}

/// A line the bridge must reject without stopping.
pub fn generate_garbage(rng: &mut impl Rng) -> String {
    const SAMPLES: [&str; 4] = [
        "I (1234) dht11: sensor timeout\n",
        "{\"device_id\":\"esp32_1\",\"temp_c\":\n",
        "\n",
        "\u{fffd}\u{fffd}boot\n",
    ];
    SAMPLES[rng.gen_range(0..SAMPLES.len())].to_string()
}

fn tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
