/// Engine wide tuning.
///
/// All timer values count ticks of the timer they belong to. Fast timer values are in ticks of
/// [`fast_periodic_processing`], of which there are `fast_timer_rate` per second. Keepalive
/// values are in seconds, the period of [`slow_periodic_processing`].
///
/// [`fast_periodic_processing`]: struct.Endpoint.html#method.fast_periodic_processing
/// [`slow_periodic_processing`]: struct.Endpoint.html#method.slow_periodic_processing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// Fast timer ticks per second.
    pub fast_timer_rate: u32,

    /// Delay of an acknowledgement for in-order data, in fast ticks.
    ///
    /// RFC 1122 requires this to be below 500ms.
    pub ack_timer_rate: u32,

    /// The initial retransmission timeout, in fast ticks.
    pub transmit_timer_rate: u32,

    /// Whether new sockets probe idle connections.
    pub keepalive: bool,

    /// Idle seconds before the first keepalive probe.
    pub keepalive_initial: u32,

    /// Seconds between unanswered keepalive probes.
    pub keepalive_retry: u32,

    /// Unanswered keepalive probes before the connection is reset.
    pub keepalive_retries: u32,

    /// Default depth of the sent queue of a socket.
    pub maximum_tx_queue: usize,

    /// Default number of retransmissions before a connection is reset.
    pub maximum_retries: u32,

    /// Default exponential backoff, as a shift per retry.
    pub retry_shift: u32,

    /// Default depth of the receive queue of a socket.
    pub maximum_rx_queue: usize,

    /// Maximum segment lifetime in seconds, TIME_WAIT lasts twice as long.
    pub maximum_segment_lifetime: u32,

    /// Connection requests with a smaller MSS option are refused.
    pub mss_minimum: u16,

    /// Offer and accept the window scale option of RFC 1323.
    pub window_scaling: bool,

    /// Lowest port of the range searched for an ephemeral port.
    pub search_port_start: u16,

    /// Out-of-order segments kept per socket before the newest is dropped.
    pub max_out_of_order: Option<u32>,

    /// Acknowledge immediately after this many in-order segments.
    pub ack_every_n: Option<u32>,
}

impl Config {
    /// The duration of TIME_WAIT, in fast ticks.
    pub fn time_wait_ticks(&self) -> u32 {
        2 * self.maximum_segment_lifetime * self.fast_timer_rate
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fast_timer_rate: 10,
            ack_timer_rate: 2,
            transmit_timer_rate: 10,
            keepalive: false,
            keepalive_initial: 7200,
            keepalive_retry: 75,
            keepalive_retries: 10,
            maximum_tx_queue: 20,
            maximum_retries: 10,
            retry_shift: 0,
            maximum_rx_queue: 20,
            maximum_segment_lifetime: 120,
            mss_minimum: 128,
            window_scaling: true,
            search_port_start: 0xC000,
            max_out_of_order: None,
            ack_every_n: None,
        }
    }
}
