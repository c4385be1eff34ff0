use crate::err::Error;
use crate::models::{Class, Role, User};

/// Whether one more student fits into `class` given its current head count.
///
/// Stores call this inside the same atomic section that inserts the
/// enrollment, so a refusal leaves the roster untouched.
pub fn admit(class: &Class, enrolled: usize) -> Result<(), Error> {
    let capacity = usize::try_from(class.capacity).unwrap_or(0);
    if enrolled >= capacity {
        log::warn!(
            "refusing enrollment into class {} ({}): {}/{} seats taken",
            class.id,
            class.name,
            enrolled,
            capacity
        );
        return Err(Error::conflict(format!(
            "Class `{}` is full ({} of {} seats taken)",
            class.name, enrolled, capacity
        )));
    }
    Ok(())
}

pub fn ensure_student(user: &User) -> Result<(), Error> {
    if user.role != Role::Student {
        return Err(Error::invalid(format!("User `{}` is not a student", user.id)));
    }
    Ok(())
}

pub fn validate_capacity(capacity: i32) -> Result<(), Error> {
    if capacity < 1 {
        return Err(Error::invalid("`capacity` must be at least 1"));
    }
    Ok(())
}

/// A class may shrink, but never below the students already in it.
pub fn ensure_resizable(class: &Class, new_capacity: i32, enrolled: usize) -> Result<(), Error> {
    validate_capacity(new_capacity)?;
    if usize::try_from(new_capacity).unwrap_or(0) < enrolled {
        return Err(Error::conflict(format!(
            "Class `{}` already has {} students, capacity {} is too small",
            class.name, enrolled, new_capacity
        )));
    }
    Ok(())
}
