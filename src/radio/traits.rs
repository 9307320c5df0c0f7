/// Frame exchange with the network side
///
/// The device hands complete PHY payloads to [`Transport::send`] and polls
/// [`Transport::receive`] inside its receive windows. Receiving never blocks:
/// a window with nothing queued yields `None`.
pub trait Transport: Send + 'static {
    /// Error type for transport operations
    type Error: std::error::Error + Send + 'static;

    /// Transmit one frame
    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Take the next queued downlink frame, if any
    fn receive(&mut self) -> Option<Vec<u8>>;
}
