use rand::Rng;
use serde_json::{Map, Value};

/// Produces the bytes written on each write tick (without the line terminator)
pub trait PayloadSource: Send + Sync {
    fn next_payload(&self) -> Vec<u8>;
}

impl<F> PayloadSource for F
where
    F: Fn() -> Vec<u8> + Send + Sync,
{
    fn next_payload(&self) -> Vec<u8> {
        self()
    }
}

/// Random temperature readings as a flat JSON object:
/// `{"sensor":"temperature","value0":12.3,...}`
#[derive(Debug, Clone)]
pub struct SensorJsonPayload {
    pub sensor: String,
    pub value_count: usize,
}

impl Default for SensorJsonPayload {
    fn default() -> Self {
        Self {
            sensor: "temperature".to_string(),
            value_count: 20,
        }
    }
}

impl SensorJsonPayload {
    pub fn generate(&self) -> Value {
        let mut rng = rand::rng();
        let mut object = Map::new();
        object.insert("sensor".to_string(), Value::from(self.sensor.as_str()));
        for i in 0..self.value_count {
            object.insert(format!("value{}", i), Value::from(rng.random::<f64>() * 100.0));
        }
        Value::Object(object)
    }
}

impl PayloadSource for SensorJsonPayload {
    fn next_payload(&self) -> Vec<u8> {
        self.generate().to_string().into_bytes()
    }
}
