pub const ITEM_TEMPERATURE: &str = "Salon_Temperature2";
pub const ITEM_HUMIDITY: &str = "Salon_Humidity2";
pub const ITEM_HOME_MODE: &str = "Maison_mode";

pub const HOME_MODE_PRESENT: &str = "0";
