use tracing::info;

use crate::auth::Actor;
use crate::engine::{Engine, EngineError};
use crate::model::{CarAvailability, Fuel, Transmission};
use crate::request::CarDetails;

#[allow(clippy::too_many_arguments)]
fn sample(
    name: &str,
    price: &str,
    specs: &str,
    image: &str,
    transmission: Transmission,
    fuel: Fuel,
    capacity: &str,
    engine: &str,
    mileage: &str,
    color: &str,
) -> CarDetails {
    CarDetails {
        name: name.into(),
        price: price.into(),
        specs: specs.into(),
        image: Some(image.into()),
        transmission,
        fuel,
        capacity: capacity.into(),
        engine: Some(engine.into()),
        mileage: Some(mileage.into()),
        color: Some(color.into()),
        availability: CarAvailability::Available,
    }
}

pub fn sample_catalog() -> Vec<CarDetails> {
    use Fuel::*;
    use Transmission::*;
    vec![
        sample(
            "Toyota Vios 2020", "2,000", "Automatic, 5 Seater", "images/cars/vios.png",
            Automatic, Gas, "5-Seater", "1.5L 4-Cylinder", "25 km/l", "White",
        ),
        sample(
            "Honda City 2020", "2,200", "Manual, 5 Seater", "images/cars/city.jpg",
            Manual, Gas, "5-Seater", "1.5L 4-Cylinder", "22 km/l", "Silver",
        ),
        sample(
            "Mitsubishi Montero 2020", "3,500", "Automatic, 7 Seater", "images/cars/montero.jpg",
            Automatic, Diesel, "7-Seater", "2.5L Turbo Diesel", "15 km/l", "Black",
        ),
    ]
}

/// Add the sample cars to an empty catalog. Returns how many were added.
pub async fn seed_sample_catalog(engine: &Engine) -> Result<usize, EngineError> {
    if engine.store().car_count() > 0 {
        tracing::debug!("catalog not empty, skipping sample cars");
        return Ok(0);
    }
    let actor = Actor::system();
    let cars = sample_catalog();
    let count = cars.len();
    for details in cars {
        engine.add_car(&actor, details).await?;
    }
    info!("seeded {count} sample car(s)");
    Ok(count)
}
