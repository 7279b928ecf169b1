pub struct TrainConfig {
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub num_epochs: usize,
    /// stop when the relative change of the loss falls below this
    pub convergence_threshold: f32,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}
