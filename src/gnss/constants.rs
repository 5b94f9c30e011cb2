
pub const GPS_L1_FREQ_HZ:f64 = 1.57542e9;
pub const GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC:f64 = 1.023e6;
pub const GPS_L1_CA_CODE_LENGTH_CHIPS:usize = 1023;
pub const GPS_L1_CA_CODE_PERIOD_SEC:f64 = 1.0e-3;
pub const GPS_L1_CA_SEC_PER_CHIP:f64 = GPS_L1_CA_CODE_PERIOD_SEC / 1023.0;

/// 20 code periods per 50 [bps] data bit
pub const GPS_L1_CA_CODES_PER_BIT:usize = 20;

/// Doppler on the carrier maps onto the code rate through this ratio when
/// the DLL is carrier-aided
pub const CODE_CARRIER_RATIO:f64 = GPS_L1_CA_CODE_RATE_CHIPS_PER_SEC / GPS_L1_FREQ_HZ;
