//! In-memory entity store with the referential rules of the reporting
//! schema: wells and their measurements are removed with their oil field,
//! tasks lose their assignee when the employee is removed.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::{Employee, GasDisposal, Id, Incident, Mining, OilField, Task, Urgg, Well};
use crate::error::RegistryError;
use crate::schema::Validate;

#[derive(Debug, Clone)]
struct Table<T> {
    rows: BTreeMap<Id, T>,
    next_id: Id,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl<T> Table<T> {
    fn allocate(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn get(&self, entity: &'static str, id: Id) -> Result<&T, RegistryError> {
        self.rows.get(&id).ok_or_else(|| not_found(entity, id))
    }

    fn ensure(&self, entity: &'static str, id: Id) -> Result<(), RegistryError> {
        self.get(entity, id).map(|_| ())
    }

    fn remove(&mut self, entity: &'static str, id: Id) -> Result<T, RegistryError> {
        self.rows.remove(&id).ok_or_else(|| not_found(entity, id))
    }

    fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }
}

fn not_found(entity: &'static str, key: impl ToString) -> RegistryError {
    RegistryError::NotFound {
        entity,
        key: key.to_string(),
    }
}

fn in_range(d: NaiveDate, from: NaiveDate, to: NaiveDate) -> bool {
    from <= d && d <= to
}

/// All reporting entities, keyed by registry-assigned ids.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    oilfields: Table<OilField>,
    wells: Table<Well>,
    minings: Table<Mining>,
    urggs: Table<Urgg>,
    gas_disposals: Table<GasDisposal>,
    incidents: Table<Incident>,
    employees: Table<Employee>,
    tasks: Table<Task>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // oil fields

    pub fn insert_oilfield(&mut self, mut row: OilField) -> Result<Id, RegistryError> {
        row.validate()?;
        row.id = self.oilfields.allocate();
        let id = row.id;
        self.oilfields.rows.insert(id, row);
        Ok(id)
    }

    pub fn get_oilfield(&self, id: Id) -> Result<&OilField, RegistryError> {
        self.oilfields.get("OilField", id)
    }

    pub fn update_oilfield(&mut self, id: Id, mut row: OilField) -> Result<(), RegistryError> {
        self.oilfields.ensure("OilField", id)?;
        row.validate()?;
        row.id = id;
        self.oilfields.rows.insert(id, row);
        Ok(())
    }

    /// Removes the field, its wells and every measurement of those wells.
    pub fn delete_oilfield(&mut self, id: Id) -> Result<OilField, RegistryError> {
        let removed = self.oilfields.remove("OilField", id)?;
        let wells: Vec<Id> = self
            .wells
            .values()
            .filter(|w| w.oilfield == id)
            .map(|w| w.id)
            .collect();
        for well in wells {
            self.drop_well(well);
        }
        tracing::debug!(oilfield = id, "oil field deleted");
        Ok(removed)
    }

    // wells

    pub fn insert_well(&mut self, mut row: Well) -> Result<Id, RegistryError> {
        row.validate()?;
        self.oilfields.ensure("OilField", row.oilfield)?;
        self.check_well_ident(&row.ident_number, None)?;
        row.id = self.wells.allocate();
        let id = row.id;
        self.wells.rows.insert(id, row);
        Ok(id)
    }

    pub fn get_well(&self, id: Id) -> Result<&Well, RegistryError> {
        self.wells.get("Well", id)
    }

    pub fn update_well(&mut self, id: Id, mut row: Well) -> Result<(), RegistryError> {
        self.wells.ensure("Well", id)?;
        row.validate()?;
        self.oilfields.ensure("OilField", row.oilfield)?;
        self.check_well_ident(&row.ident_number, Some(id))?;
        row.id = id;
        self.wells.rows.insert(id, row);
        Ok(())
    }

    pub fn delete_well(&mut self, id: Id) -> Result<Well, RegistryError> {
        self.wells.ensure("Well", id)?;
        self.drop_well(id)
            .ok_or_else(|| not_found("Well", id))
    }

    fn drop_well(&mut self, id: Id) -> Option<Well> {
        self.minings.rows.retain(|_, m| m.well != id);
        self.urggs.rows.retain(|_, u| u.well != id);
        self.gas_disposals.rows.retain(|_, g| g.well != id);
        self.wells.rows.remove(&id)
    }

    fn check_well_ident(&self, ident: &str, except: Option<Id>) -> Result<(), RegistryError> {
        let taken = self
            .wells
            .values()
            .any(|w| w.ident_number == ident && Some(w.id) != except);
        if taken {
            return Err(RegistryError::Duplicate {
                entity: "Well",
                field: "ident_number",
                value: ident.to_string(),
            });
        }
        Ok(())
    }

    // measurements

    pub fn insert_mining(&mut self, mut row: Mining) -> Result<Id, RegistryError> {
        row.validate()?;
        self.wells.ensure("Well", row.well)?;
        row.id = self.minings.allocate();
        let id = row.id;
        self.minings.rows.insert(id, row);
        Ok(id)
    }

    pub fn get_mining(&self, id: Id) -> Result<&Mining, RegistryError> {
        self.minings.get("Mining", id)
    }

    pub fn update_mining(&mut self, id: Id, mut row: Mining) -> Result<(), RegistryError> {
        self.minings.ensure("Mining", id)?;
        row.validate()?;
        self.wells.ensure("Well", row.well)?;
        row.id = id;
        self.minings.rows.insert(id, row);
        Ok(())
    }

    pub fn delete_mining(&mut self, id: Id) -> Result<Mining, RegistryError> {
        self.minings.remove("Mining", id)
    }

    /// `"<oil field> - <date>"` for a production record.
    pub fn mining_label(&self, id: Id) -> Result<String, RegistryError> {
        let m = self.get_mining(id)?;
        let well = self.get_well(m.well)?;
        let field = self.get_oilfield(well.oilfield)?;
        Ok(format!("{} - {}", field.name, m.mining_date))
    }

    pub fn insert_urgg(&mut self, mut row: Urgg) -> Result<Id, RegistryError> {
        row.validate()?;
        self.wells.ensure("Well", row.well)?;
        row.id = self.urggs.allocate();
        let id = row.id;
        self.urggs.rows.insert(id, row);
        Ok(id)
    }

    pub fn get_urgg(&self, id: Id) -> Result<&Urgg, RegistryError> {
        self.urggs.get("Urgg", id)
    }

    pub fn update_urgg(&mut self, id: Id, mut row: Urgg) -> Result<(), RegistryError> {
        self.urggs.ensure("Urgg", id)?;
        row.validate()?;
        self.wells.ensure("Well", row.well)?;
        row.id = id;
        self.urggs.rows.insert(id, row);
        Ok(())
    }

    pub fn delete_urgg(&mut self, id: Id) -> Result<Urgg, RegistryError> {
        self.urggs.remove("Urgg", id)
    }

    pub fn insert_gas_disposal(&mut self, mut row: GasDisposal) -> Result<Id, RegistryError> {
        row.validate()?;
        self.wells.ensure("Well", row.well)?;
        row.id = self.gas_disposals.allocate();
        let id = row.id;
        self.gas_disposals.rows.insert(id, row);
        Ok(id)
    }

    pub fn get_gas_disposal(&self, id: Id) -> Result<&GasDisposal, RegistryError> {
        self.gas_disposals.get("GasDisposal", id)
    }

    pub fn update_gas_disposal(&mut self, id: Id, mut row: GasDisposal) -> Result<(), RegistryError> {
        self.gas_disposals.ensure("GasDisposal", id)?;
        row.validate()?;
        self.wells.ensure("Well", row.well)?;
        row.id = id;
        self.gas_disposals.rows.insert(id, row);
        Ok(())
    }

    pub fn delete_gas_disposal(&mut self, id: Id) -> Result<GasDisposal, RegistryError> {
        self.gas_disposals.remove("GasDisposal", id)
    }

    // incidents

    pub fn insert_incident(&mut self, mut row: Incident) -> Result<Id, RegistryError> {
        row.validate()?;
        row.id = self.incidents.allocate();
        let id = row.id;
        self.incidents.rows.insert(id, row);
        Ok(id)
    }

    pub fn get_incident(&self, id: Id) -> Result<&Incident, RegistryError> {
        self.incidents.get("Incident", id)
    }

    pub fn update_incident(&mut self, id: Id, mut row: Incident) -> Result<(), RegistryError> {
        self.incidents.ensure("Incident", id)?;
        row.validate()?;
        row.id = id;
        self.incidents.rows.insert(id, row);
        Ok(())
    }

    pub fn delete_incident(&mut self, id: Id) -> Result<Incident, RegistryError> {
        self.incidents.remove("Incident", id)
    }

    // employees

    pub fn insert_employee(&mut self, mut row: Employee) -> Result<Id, RegistryError> {
        row.validate()?;
        self.check_employee_unique(&row, None)?;
        row.id = self.employees.allocate();
        let id = row.id;
        self.employees.rows.insert(id, row);
        Ok(id)
    }

    pub fn get_employee(&self, id: Id) -> Result<&Employee, RegistryError> {
        self.employees.get("Employee", id)
    }

    /// Lookup by personnel number.
    pub fn employee_by_number(&self, number: i64) -> Result<&Employee, RegistryError> {
        self.employees
            .values()
            .find(|e| e.id_employee == Some(number))
            .ok_or_else(|| not_found("Employee", number))
    }

    /// Changing the personnel number re-points the employee's tasks.
    pub fn update_employee(&mut self, id: Id, mut row: Employee) -> Result<(), RegistryError> {
        let previous = self.employees.get("Employee", id)?.id_employee;
        row.validate()?;
        self.check_employee_unique(&row, Some(id))?;
        if previous.is_some() && previous != row.id_employee {
            for task in self.tasks.rows.values_mut() {
                if task.employee == previous {
                    task.employee = row.id_employee;
                }
            }
        }
        row.id = id;
        self.employees.rows.insert(id, row);
        Ok(())
    }

    /// Removes the employee; their tasks stay with no assignee.
    pub fn delete_employee(&mut self, id: Id) -> Result<Employee, RegistryError> {
        let removed = self.employees.remove("Employee", id)?;
        if let Some(number) = removed.id_employee {
            for task in self.tasks.rows.values_mut() {
                if task.employee == Some(number) {
                    task.employee = None;
                }
            }
        }
        Ok(removed)
    }

    fn check_employee_unique(&self, row: &Employee, except: Option<Id>) -> Result<(), RegistryError> {
        for other in self.employees.values().filter(|e| Some(e.id) != except) {
            if row.id_employee.is_some() && other.id_employee == row.id_employee {
                return Err(RegistryError::Duplicate {
                    entity: "Employee",
                    field: "id_employee",
                    value: row.id_employee.map(|n| n.to_string()).unwrap_or_default(),
                });
            }
            if other.email.eq_ignore_ascii_case(&row.email) {
                return Err(RegistryError::Duplicate {
                    entity: "Employee",
                    field: "email",
                    value: row.email.clone(),
                });
            }
            if other.phone_number == row.phone_number {
                return Err(RegistryError::Duplicate {
                    entity: "Employee",
                    field: "phone_number",
                    value: row.phone_number.clone(),
                });
            }
        }
        Ok(())
    }

    // tasks

    pub fn insert_task(&mut self, mut row: Task) -> Result<Id, RegistryError> {
        row.validate()?;
        if let Some(number) = row.employee {
            self.employee_by_number(number)?;
        }
        row.id = self.tasks.allocate();
        let id = row.id;
        self.tasks.rows.insert(id, row);
        Ok(id)
    }

    pub fn get_task(&self, id: Id) -> Result<&Task, RegistryError> {
        self.tasks.get("Task", id)
    }

    pub fn update_task(&mut self, id: Id, mut row: Task) -> Result<(), RegistryError> {
        self.tasks.ensure("Task", id)?;
        row.validate()?;
        if let Some(number) = row.employee {
            self.employee_by_number(number)?;
        }
        row.id = id;
        self.tasks.rows.insert(id, row);
        Ok(())
    }

    pub fn delete_task(&mut self, id: Id) -> Result<Task, RegistryError> {
        self.tasks.remove("Task", id)
    }

    // queries

    pub fn oilfields(&self) -> Vec<&OilField> {
        self.oilfields.values().collect()
    }

    pub fn wells_of(&self, oilfield: Id) -> Vec<&Well> {
        self.wells.values().filter(|w| w.oilfield == oilfield).collect()
    }

    /// Case-insensitive substring match on the well identifier.
    pub fn search_wells(&self, needle: &str) -> Vec<&Well> {
        let needle = needle.to_lowercase();
        self.wells
            .values()
            .filter(|w| w.ident_number.to_lowercase().contains(&needle))
            .collect()
    }

    /// Production records with `from <= date <= to`, oldest first.
    pub fn minings_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<&Mining> {
        let mut rows: Vec<&Mining> = self
            .minings
            .values()
            .filter(|m| in_range(m.mining_date, from, to))
            .collect();
        rows.sort_by_key(|m| (m.mining_date, m.id));
        rows
    }

    pub fn urgg_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<&Urgg> {
        let mut rows: Vec<&Urgg> = self
            .urggs
            .values()
            .filter(|u| in_range(u.urgg_date, from, to))
            .collect();
        rows.sort_by_key(|u| (u.urgg_date, u.id));
        rows
    }

    pub fn gas_disposal_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<&GasDisposal> {
        let mut rows: Vec<&GasDisposal> = self
            .gas_disposals
            .values()
            .filter(|g| in_range(g.gas_disposal_date, from, to))
            .collect();
        rows.sort_by_key(|g| (g.gas_disposal_date, g.id));
        rows
    }

    pub fn incidents_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<&Incident> {
        let mut rows: Vec<&Incident> = self
            .incidents
            .values()
            .filter(|i| in_range(i.incident_date, from, to))
            .collect();
        rows.sort_by_key(|i| (i.incident_date, i.id));
        rows
    }

    /// Tasks assigned to the employee with registry id `employee`.
    pub fn tasks_of(&self, employee: Id) -> Result<Vec<&Task>, RegistryError> {
        let number = self.get_employee(employee)?.id_employee;
        if number.is_none() {
            return Ok(Vec::new());
        }
        Ok(self.tasks.values().filter(|t| t.employee == number).collect())
    }

    pub fn unassigned_tasks(&self) -> Vec<&Task> {
        self.tasks.values().filter(|t| t.employee.is_none()).collect()
    }

    pub fn employees_ordered_by_email(&self) -> Vec<&Employee> {
        let mut rows: Vec<&Employee> = self.employees.values().collect();
        rows.sort_by(|a, b| a.email.to_lowercase().cmp(&b.email.to_lowercase()));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Quantity;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn field(name: &str) -> OilField {
        OilField {
            id: 0,
            name: name.into(),
            asurg: 80,
            gas_disposal: 95,
        }
    }

    fn well(oilfield: Id, ident: &str) -> Well {
        Well {
            id: 0,
            oilfield,
            ident_number: ident.into(),
            well_type: "добывающая".into(),
            well_status: "в работе".into(),
        }
    }

    fn employee(number: Option<i64>, email: &str, phone: &str) -> Employee {
        Employee {
            id: 0,
            id_employee: number,
            email: email.into(),
            first_name: "Иван".into(),
            last_name: "Сидоров".into(),
            middle_name: String::new(),
            phone_number: phone.into(),
        }
    }

    fn task(employee: Option<i64>, details: &str) -> Task {
        Task {
            id: 0,
            task_date: date("2021-06-08"),
            employee,
            task_details: details.into(),
        }
    }

    fn seeded() -> (Registry, Id, Id) {
        let mut reg = Registry::new();
        let f = reg.insert_oilfield(field("Самотлор")).unwrap();
        let w = reg.insert_well(well(f, "СМ-101")).unwrap();
        reg.insert_mining(Mining {
            id: 0,
            well: w,
            mining_date: date("2021-06-07"),
            mining_value: "120.5".parse::<Quantity>().unwrap(),
        })
        .unwrap();
        reg.insert_urgg(Urgg {
            id: 0,
            well: w,
            urgg_date: date("2021-06-07"),
            urgg_count: 340,
        })
        .unwrap();
        reg.insert_gas_disposal(GasDisposal {
            id: 0,
            well: w,
            gas_disposal_date: date("2021-06-06"),
            gas_disposal_count: 12,
        })
        .unwrap();
        (reg, f, w)
    }

    #[test]
    fn deleting_oilfield_cascades() {
        let (mut reg, f, w) = seeded();
        assert_eq!(reg.wells_of(f).len(), 1);
        reg.delete_oilfield(f).unwrap();
        assert!(matches!(reg.get_well(w), Err(RegistryError::NotFound { .. })));
        let all = (date("2000-01-01"), date("2100-01-01"));
        assert!(reg.minings_between(all.0, all.1).is_empty());
        assert!(reg.urgg_between(all.0, all.1).is_empty());
        assert!(reg.gas_disposal_between(all.0, all.1).is_empty());
    }

    #[test]
    fn well_requires_existing_oilfield_and_unique_ident() {
        let (mut reg, f, _) = seeded();
        assert!(matches!(
            reg.insert_well(well(999, "X-1")),
            Err(RegistryError::NotFound { entity: "OilField", .. })
        ));
        assert_eq!(
            reg.insert_well(well(f, "СМ-101")).unwrap_err(),
            RegistryError::Duplicate {
                entity: "Well",
                field: "ident_number",
                value: "СМ-101".into()
            }
        );
    }

    #[test]
    fn mining_label_resolves_oilfield_name() {
        let (reg, _, _) = seeded();
        let m = reg.minings_between(date("2021-06-01"), date("2021-06-30"))[0].id;
        assert_eq!(reg.mining_label(m).unwrap(), "Самотлор - 2021-06-07");
    }

    #[test]
    fn date_range_queries_are_inclusive() {
        let (reg, _, _) = seeded();
        assert_eq!(reg.urgg_between(date("2021-06-07"), date("2021-06-07")).len(), 1);
        assert!(reg.gas_disposal_between(date("2021-06-07"), date("2021-06-08")).is_empty());
    }

    #[test]
    fn search_wells_is_case_insensitive() {
        let (reg, _, _) = seeded();
        assert_eq!(reg.search_wells("см-1").len(), 1);
        assert!(reg.search_wells("zz").is_empty());
    }

    #[test]
    fn employee_uniqueness() {
        let mut reg = Registry::new();
        reg.insert_employee(employee(Some(1), "a@oil.example", "+79990000001"))
            .unwrap();
        let dup_email = reg.insert_employee(employee(Some(2), "A@oil.example", "+79990000002"));
        assert!(matches!(
            dup_email,
            Err(RegistryError::Duplicate { field: "email", .. })
        ));
        let dup_phone = reg.insert_employee(employee(Some(3), "c@oil.example", "+79990000001"));
        assert!(matches!(
            dup_phone,
            Err(RegistryError::Duplicate { field: "phone_number", .. })
        ));
        let dup_number = reg.insert_employee(employee(Some(1), "d@oil.example", "+79990000004"));
        assert!(matches!(
            dup_number,
            Err(RegistryError::Duplicate { field: "id_employee", .. })
        ));
        // employees without a personnel number never collide on it
        reg.insert_employee(employee(None, "e@oil.example", "+79990000005"))
            .unwrap();
        reg.insert_employee(employee(None, "f@oil.example", "+79990000006"))
            .unwrap();
    }

    #[test]
    fn deleting_employee_unassigns_tasks() {
        let mut reg = Registry::new();
        let e = reg
            .insert_employee(employee(Some(7), "b@oil.example", "+79990000007"))
            .unwrap();
        let t = reg.insert_task(task(Some(7), "Замер дебита")).unwrap();
        assert_eq!(reg.tasks_of(e).unwrap().len(), 1);
        reg.delete_employee(e).unwrap();
        assert_eq!(reg.get_task(t).unwrap().employee, None);
        assert_eq!(reg.unassigned_tasks().len(), 1);
    }

    #[test]
    fn task_requires_known_employee_number() {
        let mut reg = Registry::new();
        assert!(matches!(
            reg.insert_task(task(Some(42), "Обход")),
            Err(RegistryError::NotFound { entity: "Employee", .. })
        ));
    }

    #[test]
    fn renumbering_employee_keeps_tasks() {
        let mut reg = Registry::new();
        let e = reg
            .insert_employee(employee(Some(7), "b@oil.example", "+79990000007"))
            .unwrap();
        reg.insert_task(task(Some(7), "Обход куста")).unwrap();
        reg.update_employee(e, employee(Some(8), "b@oil.example", "+79990000007"))
            .unwrap();
        assert_eq!(reg.tasks_of(e).unwrap().len(), 1);
    }

    #[test]
    fn employees_sorted_by_email() {
        let mut reg = Registry::new();
        reg.insert_employee(employee(None, "zoya@oil.example", "+79990000011"))
            .unwrap();
        reg.insert_employee(employee(None, "boris@oil.example", "+79990000012"))
            .unwrap();
        let emails: Vec<&str> = reg
            .employees_ordered_by_email()
            .iter()
            .map(|e| e.email.as_str())
            .collect();
        assert_eq!(emails, vec!["boris@oil.example", "zoya@oil.example"]);
    }

    #[test]
    fn invalid_rows_are_rejected_on_update() {
        let (mut reg, f, _) = seeded();
        let mut bad = field("Самотлор");
        bad.asurg = 150;
        assert!(matches!(
            reg.update_oilfield(f, bad),
            Err(RegistryError::Invalid(_))
        ));
        assert_eq!(reg.get_oilfield(f).unwrap().asurg, 80);
    }
}
