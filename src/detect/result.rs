/// One raw detector output, before normalization.
///
/// `bbox` is `[xmin, ymin, xmax, ymax]` in pixels of the image the detector was
/// given. It is kept as a slice of whatever length the backend produced so the
/// normalizer can reject malformed boxes instead of the backend panicking.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: Vec<f32>,
}

impl RawDetection {
    pub fn new(class_id: u32, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            class_id,
            confidence,
            bbox: bbox.to_vec(),
        }
    }
}
