use std::time::Duration;

use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions};
use sqlx::{Encode, QueryBuilder, Type};

use crate::config::Config;
use crate::error::{db_error, ApiError};
use crate::password::hash_password;

pub async fn connect_mysql(cfg: &Config) -> anyhow::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_secs(60))
        .connect(&cfg.database_url)
        .await?;
    Ok(pool)
}

/// Creates every table that does not exist yet. Statements are ordered so that
/// referenced tables come first.
pub async fn init_schema(pool: &MySqlPool) -> anyhow::Result<()> {
    for stmt in SCHEMA {
        sqlx::raw_sql(stmt).execute(pool).await?;
    }
    tracing::info!(tables = SCHEMA.len(), "database schema ready");
    Ok(())
}

const DEFAULT_DEPARTMENTS: &[(&str, &str, &str)] = &[
    ("Cardiology", "Heart and cardiovascular system care", "Floor 2, Wing A"),
    ("Neurology", "Brain and nervous system disorders", "Floor 3, Wing B"),
    ("Orthopedics", "Bone, joint, and muscle care", "Floor 1, Wing C"),
    ("Pediatrics", "Medical care for children", "Floor 2, Wing D"),
    ("Emergency Medicine", "Emergency and urgent care", "Ground Floor, Main Entrance"),
    ("Radiology", "Medical imaging and diagnostics", "Floor 1, Wing E"),
    ("Oncology", "Cancer treatment and care", "Floor 4, Wing A"),
    ("Dermatology", "Skin, hair, and nail care", "Floor 2, Wing F"),
];

/// Inserts the default departments and the admin account. Safe to run on every start.
pub async fn seed_defaults(pool: &MySqlPool, cfg: &Config) -> anyhow::Result<()> {
    for (name, description, location) in DEFAULT_DEPARTMENTS {
        sqlx::query(
            r#"
            INSERT IGNORE INTO departments (name, description, location)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(location)
        .execute(pool)
        .await?;
    }

    let admin_hash = hash_password(&cfg.admin_password).map_err(anyhow::Error::msg)?;
    let inserted = sqlx::query(
        r#"
        INSERT IGNORE INTO users (email, password, role, first_name, last_name)
        VALUES (?, ?, 'admin', 'System', 'Administrator')
        "#,
    )
    .bind(&cfg.admin_email)
    .bind(admin_hash)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted > 0 {
        tracing::info!(email = %cfg.admin_email, "default admin account created");
    }
    Ok(())
}

/// Fails with 400 `INVALID_REFERENCE` when `table` has no row with `id`.
pub async fn require_reference<'e, E>(
    executor: E,
    table: &'static str,
    id: i64,
    label: &str,
) -> Result<(), ApiError>
where
    E: sqlx::Executor<'e, Database = MySql>,
{
    let found: Option<i64> = sqlx::query_scalar(&format!("SELECT id FROM {table} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(db_error)?;

    match found {
        Some(_) => Ok(()),
        None => Err(ApiError::BadRequest(
            "INVALID_REFERENCE",
            format!("{label} not found"),
        )),
    }
}

/// Builds `UPDATE <table> SET a = ?, b = ? WHERE id = ?` from the fields a
/// request actually carries.
pub struct UpdateSet<'a> {
    qb: QueryBuilder<'a, MySql>,
    fields: usize,
}

impl<'a> UpdateSet<'a> {
    pub fn new(table: &str) -> Self {
        Self {
            qb: QueryBuilder::new(format!("UPDATE {table} SET ")),
            fields: 0,
        }
    }

    pub fn set<T>(&mut self, column: &str, value: T) -> &mut Self
    where
        T: 'a + Encode<'a, MySql> + Type<MySql> + Send,
    {
        if self.fields > 0 {
            self.qb.push(", ");
        }
        self.qb.push(column).push(" = ").push_bind(value);
        self.fields += 1;
        self
    }

    pub fn set_opt<T>(&mut self, column: &str, value: Option<T>) -> &mut Self
    where
        T: 'a + Encode<'a, MySql> + Type<MySql> + Send,
    {
        if let Some(v) = value {
            self.set(column, v);
        }
        self
    }

    /// Raw SQL assignment such as `paid_at = NOW()`.
    pub fn set_raw(&mut self, assignment: &str) -> &mut Self {
        if self.fields > 0 {
            self.qb.push(", ");
        }
        self.qb.push(assignment);
        self.fields += 1;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields == 0
    }

    pub fn sql(&self) -> &str {
        self.qb.sql()
    }

    pub async fn execute_by_id<'e, E>(mut self, id: i64, executor: E) -> Result<u64, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = MySql>,
    {
        self.qb.push(" WHERE id = ").push_bind(id);
        let result = self.qb.build().execute(executor).await?;
        Ok(result.rows_affected())
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      email VARCHAR(255) NOT NULL UNIQUE,
      password VARCHAR(255) NOT NULL,
      role VARCHAR(20) NOT NULL,
      first_name VARCHAR(100) NOT NULL,
      last_name VARCHAR(100) NOT NULL,
      phone VARCHAR(20),
      avatar VARCHAR(255),
      is_active BOOLEAN NOT NULL DEFAULT TRUE,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      INDEX idx_users_role (role),
      INDEX idx_users_active (is_active)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS departments (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      name VARCHAR(100) NOT NULL UNIQUE,
      description TEXT,
      head_doctor_id BIGINT,
      location VARCHAR(255),
      phone VARCHAR(20),
      email VARCHAR(255),
      is_active BOOLEAN NOT NULL DEFAULT TRUE,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (head_doctor_id) REFERENCES users(id) ON DELETE SET NULL,
      INDEX idx_departments_active (is_active)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS patients (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      patient_number VARCHAR(32) NOT NULL UNIQUE,
      first_name VARCHAR(100) NOT NULL,
      last_name VARCHAR(100) NOT NULL,
      email VARCHAR(255),
      phone VARCHAR(20),
      date_of_birth DATE,
      gender VARCHAR(10),
      address TEXT,
      emergency_contact_name VARCHAR(100),
      emergency_contact_phone VARCHAR(20),
      blood_type VARCHAR(5),
      allergies TEXT,
      medical_history TEXT,
      insurance_provider VARCHAR(100),
      insurance_number VARCHAR(50),
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      INDEX idx_patients_name (first_name, last_name),
      INDEX idx_patients_email (email),
      INDEX idx_patients_phone (phone)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS doctors (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      user_id BIGINT NOT NULL UNIQUE,
      department_id BIGINT,
      specialization VARCHAR(100) NOT NULL,
      license_number VARCHAR(50) NOT NULL,
      experience_years INT NOT NULL DEFAULT 0,
      consultation_fee_cents BIGINT NOT NULL DEFAULT 0,
      availability_schedule JSON,
      bio TEXT,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
      FOREIGN KEY (department_id) REFERENCES departments(id) ON DELETE SET NULL,
      INDEX idx_doctors_specialization (specialization)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS appointments (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      patient_id BIGINT NOT NULL,
      doctor_id BIGINT NOT NULL,
      department_id BIGINT,
      appointment_date DATE NOT NULL,
      appointment_time TIME NOT NULL,
      duration_minutes INT NOT NULL DEFAULT 30,
      status VARCHAR(20) NOT NULL DEFAULT 'scheduled',
      type VARCHAR(20) NOT NULL DEFAULT 'consultation',
      notes TEXT,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE,
      FOREIGN KEY (doctor_id) REFERENCES doctors(id) ON DELETE CASCADE,
      FOREIGN KEY (department_id) REFERENCES departments(id) ON DELETE SET NULL,
      INDEX idx_appointments_doctor_date (doctor_id, appointment_date),
      INDEX idx_appointments_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS medical_records (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      patient_id BIGINT NOT NULL,
      doctor_id BIGINT NOT NULL,
      appointment_id BIGINT,
      diagnosis TEXT,
      symptoms TEXT,
      treatment TEXT,
      prescription TEXT,
      vital_signs JSON,
      notes TEXT,
      follow_up_date DATE,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE,
      FOREIGN KEY (doctor_id) REFERENCES doctors(id) ON DELETE CASCADE,
      FOREIGN KEY (appointment_id) REFERENCES appointments(id) ON DELETE SET NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_reports (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      report_type VARCHAR(32) NOT NULL,
      title VARCHAR(255) NOT NULL,
      content TEXT NOT NULL,
      parameters JSON,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      INDEX idx_ai_reports_type (report_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS medicines (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      name VARCHAR(150) NOT NULL,
      generic_name VARCHAR(150),
      category VARCHAR(100),
      manufacturer VARCHAR(150),
      unit_price_cents BIGINT NOT NULL DEFAULT 0,
      stock_quantity INT NOT NULL DEFAULT 0,
      reorder_level INT NOT NULL DEFAULT 10,
      expiry_date DATE,
      status VARCHAR(20) NOT NULL DEFAULT 'active',
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      INDEX idx_medicines_name (name),
      INDEX idx_medicines_category (category)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prescriptions (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      patient_id BIGINT NOT NULL,
      doctor_id BIGINT NOT NULL,
      prescription_type VARCHAR(50) NOT NULL DEFAULT 'standard',
      diagnosis TEXT,
      medications TEXT NOT NULL,
      notes_for_pharmacist TEXT,
      status VARCHAR(20) NOT NULL DEFAULT 'active',
      prescription_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE,
      FOREIGN KEY (doctor_id) REFERENCES doctors(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      invoice_number VARCHAR(32) NOT NULL UNIQUE,
      patient_id BIGINT NOT NULL,
      amount_cents BIGINT NOT NULL,
      status VARCHAR(20) NOT NULL DEFAULT 'pending',
      due_date DATE,
      paid_at TIMESTAMP NULL,
      notes TEXT,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE,
      INDEX idx_invoices_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS insurance_claims (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      claim_number VARCHAR(32) NOT NULL UNIQUE,
      patient_id BIGINT NOT NULL,
      invoice_id BIGINT,
      provider VARCHAR(100) NOT NULL,
      amount_cents BIGINT NOT NULL,
      status VARCHAR(20) NOT NULL DEFAULT 'pending',
      notes TEXT,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE,
      FOREIGN KEY (invoice_id) REFERENCES invoices(id) ON DELETE SET NULL,
      INDEX idx_claims_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ambulances (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      name VARCHAR(100) NOT NULL,
      registration_number VARCHAR(50) NOT NULL UNIQUE,
      driver_name VARCHAR(100),
      driver_phone VARCHAR(20),
      status VARCHAR(20) NOT NULL DEFAULT 'available',
      location VARCHAR(255),
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      INDEX idx_ambulances_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS emergency_calls (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      patient_name VARCHAR(200) NOT NULL,
      phone VARCHAR(20) NOT NULL,
      location VARCHAR(255) NOT NULL,
      emergency_type VARCHAR(100) NOT NULL,
      priority VARCHAR(10) NOT NULL DEFAULT 'high',
      status VARCHAR(20) NOT NULL DEFAULT 'pending',
      ambulance_id BIGINT,
      call_time TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      notes TEXT,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (ambulance_id) REFERENCES ambulances(id) ON DELETE SET NULL,
      INDEX idx_calls_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staff (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      first_name VARCHAR(100) NOT NULL,
      last_name VARCHAR(100) NOT NULL,
      email VARCHAR(255) NOT NULL UNIQUE,
      phone VARCHAR(20),
      date_of_birth DATE,
      gender VARCHAR(10),
      address TEXT,
      role VARCHAR(100) NOT NULL,
      department VARCHAR(100),
      joined_date DATE NOT NULL,
      status VARCHAR(20) NOT NULL DEFAULT 'active',
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      INDEX idx_staff_department (department),
      INDEX idx_staff_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rooms (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      room_number VARCHAR(20) NOT NULL UNIQUE,
      room_type VARCHAR(50) NOT NULL,
      department VARCHAR(100) NOT NULL,
      floor INT NOT NULL,
      capacity INT NOT NULL,
      price_per_day_cents BIGINT NOT NULL,
      status VARCHAR(20) NOT NULL DEFAULT 'available',
      description TEXT,
      attached_bathroom BOOLEAN NOT NULL DEFAULT FALSE,
      air_conditioning BOOLEAN NOT NULL DEFAULT FALSE,
      oxygen_supply BOOLEAN NOT NULL DEFAULT FALSE,
      wheelchair_accessible BOOLEAN NOT NULL DEFAULT FALSE,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      INDEX idx_rooms_department (department)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS room_allotments (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      room_id BIGINT NOT NULL,
      patient_id BIGINT NOT NULL,
      attending_doctor_id BIGINT,
      allotment_date DATE NOT NULL,
      expected_discharge_date DATE,
      discharged_at TIMESTAMP NULL,
      status VARCHAR(20) NOT NULL DEFAULT 'occupied',
      notes TEXT,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE,
      FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE,
      FOREIGN KEY (attending_doctor_id) REFERENCES doctors(id) ON DELETE SET NULL,
      INDEX idx_allotments_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blood_donors (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      name VARCHAR(200) NOT NULL,
      blood_type VARCHAR(3) NOT NULL,
      phone VARCHAR(20),
      email VARCHAR(255),
      date_of_birth DATE,
      gender VARCHAR(10),
      last_donation_date DATE,
      status VARCHAR(20) NOT NULL DEFAULT 'active',
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blood_units (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      unit_number VARCHAR(32) NOT NULL UNIQUE,
      blood_type VARCHAR(3) NOT NULL,
      donor_id BIGINT,
      quantity INT NOT NULL DEFAULT 1,
      collection_date DATE NOT NULL,
      expiry_date DATE NOT NULL,
      status VARCHAR(20) NOT NULL DEFAULT 'available',
      notes TEXT,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (donor_id) REFERENCES blood_donors(id) ON DELETE SET NULL,
      INDEX idx_blood_units_type_status (blood_type, status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blood_issues (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      issue_number VARCHAR(32) NOT NULL UNIQUE,
      blood_unit_id BIGINT,
      blood_type VARCHAR(3) NOT NULL,
      units INT NOT NULL DEFAULT 1,
      recipient_patient_id BIGINT,
      requesting_doctor_id BIGINT,
      purpose VARCHAR(255),
      status VARCHAR(20) NOT NULL DEFAULT 'pending',
      issued_at TIMESTAMP NULL,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (blood_unit_id) REFERENCES blood_units(id) ON DELETE SET NULL,
      FOREIGN KEY (recipient_patient_id) REFERENCES patients(id) ON DELETE SET NULL,
      FOREIGN KEY (requesting_doctor_id) REFERENCES doctors(id) ON DELETE SET NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS suppliers (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      name VARCHAR(150) NOT NULL UNIQUE,
      category VARCHAR(100) NOT NULL,
      contact_person VARCHAR(150),
      email VARCHAR(255) NOT NULL,
      phone VARCHAR(20),
      location VARCHAR(255),
      rating TINYINT,
      status VARCHAR(20) NOT NULL DEFAULT 'active',
      description TEXT,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      INDEX idx_suppliers_category (category),
      INDEX idx_suppliers_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_alerts (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      medicine_id BIGINT NOT NULL,
      supplier_id BIGINT,
      current_stock INT NOT NULL,
      min_level INT NOT NULL,
      status VARCHAR(20) NOT NULL DEFAULT 'low_stock',
      notes TEXT,
      resolved_at TIMESTAMP NULL,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (medicine_id) REFERENCES medicines(id) ON DELETE CASCADE,
      FOREIGN KEY (supplier_id) REFERENCES suppliers(id) ON DELETE SET NULL,
      INDEX idx_inventory_alerts_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prescription_templates (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      name VARCHAR(150) NOT NULL,
      category VARCHAR(100),
      medications JSON NOT NULL,
      instructions TEXT,
      created_by BIGINT,
      usage_count INT NOT NULL DEFAULT 0,
      last_used_at TIMESTAMP NULL,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL,
      INDEX idx_prescription_templates_last_used (last_used_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staff_attendance (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      staff_id BIGINT NOT NULL,
      attendance_date DATE NOT NULL,
      status VARCHAR(20) NOT NULL DEFAULT 'present',
      check_in TIME,
      check_out TIME,
      worked_minutes INT,
      notes TEXT,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (staff_id) REFERENCES staff(id) ON DELETE CASCADE,
      UNIQUE KEY uq_staff_attendance_day (staff_id, attendance_date),
      INDEX idx_staff_attendance_date (attendance_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS specializations (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      name VARCHAR(100) NOT NULL UNIQUE,
      description TEXT,
      department_id BIGINT,
      status VARCHAR(20) NOT NULL DEFAULT 'active',
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (department_id) REFERENCES departments(id) ON DELETE SET NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reviews (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      subject_type VARCHAR(20) NOT NULL,
      subject_name VARCHAR(200) NOT NULL,
      rating TINYINT NOT NULL,
      comment TEXT,
      reviewer_name VARCHAR(150),
      status VARCHAR(20) NOT NULL DEFAULT 'active',
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      INDEX idx_reviews_subject (subject_type, subject_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feedback (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      subject VARCHAR(200) NOT NULL,
      message TEXT NOT NULL,
      sender_name VARCHAR(150),
      sender_email VARCHAR(255),
      category VARCHAR(20) NOT NULL DEFAULT 'general',
      status VARCHAR(20) NOT NULL DEFAULT 'pending',
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      INDEX idx_feedback_status (status)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS activity_logs (
      id BIGINT PRIMARY KEY AUTO_INCREMENT,
      entity_type VARCHAR(50) NOT NULL,
      entity_id BIGINT,
      action VARCHAR(20) NOT NULL,
      description VARCHAR(500) NOT NULL,
      created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
      INDEX idx_activity_entity (entity_type, entity_id),
      INDEX idx_activity_created (created_at)
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_set_joins_assignments() {
        let mut set = UpdateSet::new("patients");
        assert!(set.is_empty());
        set.set("first_name", "Alice".to_string())
            .set_opt::<String>("email", None)
            .set_opt("phone", Some("+1-555-1001".to_string()))
            .set_raw("updated_at = NOW()");
        assert!(!set.is_empty());
        assert_eq!(
            set.sql(),
            "UPDATE patients SET first_name = ?, phone = ?, updated_at = NOW()"
        );
    }

    #[test]
    fn referenced_tables_are_created_first() {
        let position = |table: &str| {
            SCHEMA
                .iter()
                .position(|s| s.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")))
                .unwrap_or_else(|| panic!("missing table {table}"))
        };
        for stmt in SCHEMA {
            for (idx, _) in stmt.match_indices("REFERENCES ") {
                let referenced: String = stmt[idx + "REFERENCES ".len()..]
                    .chars()
                    .take_while(|c| *c != '(')
                    .collect();
                let here = SCHEMA.iter().position(|s| s == stmt).unwrap();
                assert!(position(&referenced) < here, "{referenced} must precede its users");
            }
        }
    }

    #[test]
    fn default_departments_are_unique() {
        let mut names: Vec<_> = DEFAULT_DEPARTMENTS.iter().map(|d| d.0).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), DEFAULT_DEPARTMENTS.len());
    }
}
