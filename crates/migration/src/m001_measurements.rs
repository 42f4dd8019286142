use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_measurements"
    }
}

#[derive(DeriveIden)]
enum Measurements {
    Table,
    Id,
    Ts,
    Region,
    ProjectId,
    TargetId,
    HostId,
    Type,
    Status,
    LatencyMs,
    MetaJson,
}

/// The collector's write contract: one row per completed check, rows are
/// never updated or deleted.
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Measurements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Measurements::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Measurements::Ts).date_time().not_null())
                    .col(
                        ColumnDef::new(Measurements::Region)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Measurements::ProjectId).big_integer())
                    .col(
                        ColumnDef::new(Measurements::TargetId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Measurements::HostId).string_len(128))
                    .col(
                        ColumnDef::new(Measurements::Type)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Measurements::Status)
                            .small_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Measurements::LatencyMs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Measurements::MetaJson).text())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_measurements_target_ts")
                    .table(Measurements::Table)
                    .col(Measurements::TargetId)
                    .col(Measurements::Ts)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_measurements_region_ts")
                    .table(Measurements::Table)
                    .col(Measurements::Region)
                    .col(Measurements::Ts)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_measurements_ts")
                    .table(Measurements::Table)
                    .col(Measurements::Ts)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Measurements::Table).to_owned())
            .await
    }
}
