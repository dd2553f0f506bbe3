use serde::{Deserialize, Serialize};

use crate::quantity::energy::KilowattHours;

/// The seven directed energy flows of one period.
///
/// Allocation order is fixed: solar serves the home first, then the battery, then the
/// grid; discharge serves the home before the grid; the grid fills whatever remains.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Flows {
    pub solar_to_home: KilowattHours,
    pub solar_to_battery: KilowattHours,
    pub solar_to_grid: KilowattHours,
    pub grid_to_home: KilowattHours,
    pub grid_to_battery: KilowattHours,
    pub battery_to_home: KilowattHours,
    pub battery_to_grid: KilowattHours,
}

impl Flows {
    pub fn allocate(
        solar: KilowattHours,
        home: KilowattHours,
        battery_charged: KilowattHours,
        battery_discharged: KilowattHours,
    ) -> Self {
        let solar_to_home = solar.min(home);
        let remaining_solar = solar - solar_to_home;
        let remaining_home = home - solar_to_home;

        let solar_to_battery = remaining_solar.min(battery_charged);
        let solar_to_grid = (remaining_solar - solar_to_battery).max(KilowattHours::ZERO);

        let battery_to_home = battery_discharged.min(remaining_home);
        let battery_to_grid = (battery_discharged - battery_to_home).max(KilowattHours::ZERO);

        let grid_to_home = (remaining_home - battery_to_home).max(KilowattHours::ZERO);
        let grid_to_battery = (battery_charged - solar_to_battery).max(KilowattHours::ZERO);

        Self {
            solar_to_home,
            solar_to_battery,
            solar_to_grid,
            grid_to_home,
            grid_to_battery,
            battery_to_home,
            battery_to_grid,
        }
    }

    pub fn grid_imported(&self) -> KilowattHours {
        self.grid_to_home + self.grid_to_battery
    }

    pub fn grid_exported(&self) -> KilowattHours {
        self.solar_to_grid + self.battery_to_grid
    }
}
